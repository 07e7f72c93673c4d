// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//
// Brings the shared mutex up and exits without ever locking it. Racing many of these against a
// segment that does not exist yet shows how many of them ended up initializing the mutex.
use crate::events::EventLog;
use crate::modes::behavior::{open_recorded, Behavior};
use libdd_shm_mutex::ShmMutexConfiguration;

pub struct Test;

impl Behavior for Test {
    fn run(
        &self,
        config: &ShmMutexConfiguration,
        events: &EventLog,
        _iterations: u32,
    ) -> anyhow::Result<()> {
        open_recorded(config, events)?;
        Ok(())
    }
}
