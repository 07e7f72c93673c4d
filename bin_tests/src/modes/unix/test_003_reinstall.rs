// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//
// Installs the recovery handlers twice. The second attempt must be refused while the first stays
// in effect, so the instance then holds the lock like the hold mode and relies on the handlers
// installed first to release it when signaled.
use crate::events::{EventKind, EventLog};
use crate::modes::behavior::{open_recorded, Behavior};
use libdd_shm_mutex::{recovery, RecoveryError, ShmMutexConfiguration};
use std::time::Duration;

pub struct Test;

impl Behavior for Test {
    fn run(
        &self,
        config: &ShmMutexConfiguration,
        events: &EventLog,
        _iterations: u32,
    ) -> anyhow::Result<()> {
        let mutex = open_recorded(config, events)?;
        recovery::install(&mutex)?;
        match recovery::install(&mutex) {
            Err(RecoveryError::AlreadyInstalled) => (),
            other => anyhow::bail!("second install was not refused: {other:?}"),
        }

        mutex.acquire()?;
        events.record(EventKind::Enter)?;
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }
}
