// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Instrumented shared mutex process driven by the bin_tests.
//!
//! Usage: `shm_mutex_test_app <mode> <events file> <iterations>`. The segment name and the
//! timings come from the same environment variables as the `shm-mutex` program.

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    unix::main()
}

#[cfg(unix)]
mod unix {
    use anyhow::Context;
    use bin_tests::events::EventLog;
    use bin_tests::modes::behavior::{get_behavior, Mode};
    use libdd_shm_mutex::{log, ShmMutexConfiguration};
    use std::env;

    pub fn main() -> anyhow::Result<()> {
        let mut args = env::args().skip(1);
        let mode: Mode = args
            .next()
            .context("Unexpected number of arguments 1")?
            .parse()?;
        let events = EventLog::new(args.next().context("Unexpected number of arguments 2")?);
        let iterations: u32 = args
            .next()
            .context("Unexpected number of arguments 3")?
            .parse()?;
        anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

        let config = ShmMutexConfiguration::from_env()?;
        log::init(config.log_level())?;

        get_behavior(mode).run(&config, &events, iterations)
    }
}
