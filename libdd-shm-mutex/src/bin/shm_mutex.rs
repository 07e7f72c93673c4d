// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Takes the shared mutex forever: acquire, simulate five seconds of work, release, pause.
//! Run several copies side by side to watch them take turns.

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> std::process::ExitCode {
    match unix::main() {
        Ok(never) => match never {},
        Err(e) => {
            // One line naming the failing operation.
            println!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
mod unix {
    use anyhow::Context;
    use libdd_shm_mutex::{
        log, open_shared_mutex, recovery, Controller, ShmMutexConfiguration, SimulatedWork,
    };
    use std::convert::Infallible;
    use std::env;
    use tracing::info;

    pub fn main() -> anyhow::Result<Infallible> {
        anyhow::ensure!(env::args_os().len() == 1, "No arguments allowed.");

        let config = ShmMutexConfiguration::from_env()?;
        log::init(config.log_level())?;
        info!("Starting");

        let mutex = open_shared_mutex(&config)?;
        recovery::install(&mutex).context("Error installing signal handlers")?;

        let work = SimulatedWork::from_config(&config);
        Ok(Controller::new(&mutex, work, config.idle_pause()).run()?)
    }
}
