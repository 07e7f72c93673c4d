// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

pub mod artifacts;
pub mod events;
pub mod modes;

use std::{collections::HashMap, env, ops::DerefMut, path::PathBuf, process, sync::Mutex};

use libdd_shm_mutex::SegmentName;
use once_cell::sync::OnceCell;

/// This crate implements an abstraction over compilation with cargo with the purpose
/// of testing full binaries, instead of just rust static libraries.
///
/// The main entrypoint is `fn build_artifacts` which takes a list of binaries to build,
/// invokes cargo and return the path of the built artifact.
///
/// Builds are cached between invocations so that multiple tests can use the same artifact
/// without doing expensive work twice.
///
/// It is assumed that functions in this crate are invoked in the context of a cargo #[test]
/// item, or a `cargo run` command to be able to locate artifacts built by cargo from the position
/// of the current binary.

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum BuildProfile {
    #[default]
    Debug,
    Release,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct ArtifactsBuild {
    /// Name of the `[[bin]]` target
    pub name: String,
    /// Workspace member owning the target, when it is not `bin_tests` itself
    pub package: Option<String>,
    pub build_profile: BuildProfile,
}

fn build_command(c: &ArtifactsBuild) -> process::Command {
    let mut build_cmd = process::Command::new(env!("CARGO"));
    build_cmd.arg("build");
    if let BuildProfile::Release = c.build_profile {
        build_cmd.arg("--release");
    }
    if let Some(package) = &c.package {
        build_cmd.arg("-p").arg(package);
    }
    build_cmd.arg("--bin").arg(&c.name);
    build_cmd
}

fn inner_build_artifact(c: &ArtifactsBuild) -> anyhow::Result<PathBuf> {
    let output = build_command(c).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "Cargo build failed: status code {:?}\nstderr:\n {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// This static variable contains the path in which cargo puts it's build artifacts
    /// This relies on the assumption that the current binary is assumed to not have been moved from
    /// it's directory
    static ARTIFACT_DIR: OnceCell<PathBuf> = OnceCell::new();
    let artifact_dir = ARTIFACT_DIR.get_or_try_init(|| -> anyhow::Result<PathBuf> {
        let test_bin_location = env::current_exe()?;
        let mut location_components = test_bin_location.components().rev().peekable();
        loop {
            let Some(c) = location_components.peek() else {
                break;
            };
            if c.as_os_str() == "target" {
                break;
            }
            location_components.next();
        }
        Ok(location_components.rev().collect::<PathBuf>())
    })?;

    let mut artifact_path = artifact_dir.clone();
    artifact_path.push(match c.build_profile {
        BuildProfile::Debug => "debug",
        BuildProfile::Release => "release",
    });
    artifact_path.push(&c.name);
    Ok(artifact_path)
}

/// Caches and returns the path of the artifacts built by cargo
/// This function should only be called from cargo tests
pub fn build_artifacts<'b>(
    crates: &[&'b ArtifactsBuild],
) -> anyhow::Result<HashMap<&'b ArtifactsBuild, PathBuf>> {
    static ARTIFACTS: OnceCell<Mutex<HashMap<ArtifactsBuild, PathBuf>>> = OnceCell::new();

    let mut res = HashMap::new();

    let artifacts = ARTIFACTS.get_or_init(|| Mutex::new(HashMap::new()));
    for &c in crates {
        let mut artifacts = artifacts
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact cache poisoned"))?;
        let artifacts = artifacts.deref_mut();

        if let Some(p) = artifacts.get(c) {
            res.insert(c, p.clone());
        } else {
            let p = inner_build_artifact(c)?;
            res.insert(c, p.clone());
            artifacts.insert(c.clone(), p);
        }
    }

    Ok(res)
}

/// A segment name nobody else uses, removed from the shared memory namespace when dropped.
/// The programs under test never unlink their segment, so tests have to.
pub struct TestSegment {
    name: SegmentName,
}

impl TestSegment {
    pub fn new(label: &str) -> anyhow::Result<Self> {
        let name = SegmentName::new(&format!(
            "/libdd_shm_mutex_bin_test_{}_{label}",
            process::id()
        ))?;
        _ = libdd_shm_mutex::segment::unlink(&name);
        Ok(Self { name })
    }

    pub fn name(&self) -> &SegmentName {
        &self.name
    }

    /// Whether the segment currently exists, checked without creating it.
    pub fn exists(&self) -> anyhow::Result<bool> {
        use nix::errno::Errno;
        use nix::fcntl::OFlag;
        use nix::sys::stat::Mode;

        match nix::sys::mman::shm_open(self.name.as_c_str(), OFlag::O_RDONLY, Mode::empty()) {
            Ok(_fd) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TestSegment {
    fn drop(&mut self) {
        _ = libdd_shm_mutex::segment::unlink(&self.name);
    }
}

#[macro_export]
macro_rules! timeit {
    ($op_name:literal, $op:block) => {{
        let start = std::time::Instant::now();
        let res = $op;
        let delta = start.elapsed();
        println!(
            concat!($op_name, " took {} ms"),
            delta.as_secs_f64() * 1000.0
        );
        res
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(c: &ArtifactsBuild) -> Vec<String> {
        build_command(c)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_build_command_selects_owning_package() {
        assert_eq!(
            args(&artifacts::shm_mutex(BuildProfile::Debug)),
            ["build", "-p", "libdd-shm-mutex", "--bin", "shm-mutex"]
        );
        assert_eq!(
            args(&artifacts::shm_mutex(BuildProfile::Release)),
            ["build", "--release", "-p", "libdd-shm-mutex", "--bin", "shm-mutex"]
        );
        assert_eq!(
            args(&artifacts::shm_mutex_test_app(BuildProfile::Debug)),
            ["build", "--bin", "shm_mutex_test_app"]
        );
    }
}
