// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pre-builds all artifacts needed by bin_tests.
//!
//! Run with: cargo run -p bin_tests --bin prebuild

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    use bin_tests::{artifacts, build_artifacts};

    println!("Pre-building bin_tests artifacts...");

    let artifacts = artifacts::all_prebuild_artifacts();
    let artifact_refs: Vec<_> = artifacts.iter().collect();

    let start = std::time::Instant::now();
    build_artifacts(&artifact_refs)?;
    let elapsed = start.elapsed();

    println!(
        "Successfully pre-built {} artifacts in {:.2}s",
        artifacts.len(),
        elapsed.as_secs_f64()
    );

    Ok(())
}
