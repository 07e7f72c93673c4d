// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//
// Takes the lock and sits on it until the test delivers a termination signal. The recovery
// handler has to release the lock on the way out, or every other instance waits forever.
use crate::events::{EventKind, EventLog};
use crate::modes::behavior::{open_recorded, Behavior};
use libdd_shm_mutex::{recovery, ShmMutexConfiguration};
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

        mutex.acquire()?;
        events.record(EventKind::Enter)?;
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }
}
