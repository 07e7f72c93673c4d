// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//
// The regular acquire / work / release loop, bounded to a number of iterations, with the entry
// and exit of every critical section recorded. Entry is recorded after the lock is taken and exit
// before it is released, so the recorded spans of two processes must never overlap.
use crate::events::{EventKind, EventLog};
use crate::modes::behavior::{open_recorded, Behavior};
use anyhow::Context;
use libdd_shm_mutex::{
    recovery, Controller, CriticalSection, ShmMutexConfiguration, SimulatedWork,
};

struct Instrumented<'e> {
    events: &'e EventLog,
    work: SimulatedWork,
    failure: &'e mut Option<anyhow::Error>,
}

impl CriticalSection for Instrumented<'_> {
    fn execute(&mut self) {
        let result = self
            .events
            .record(EventKind::Enter)
            .and_then(|_| {
                self.work.execute();
                self.events.record(EventKind::Exit)
            });
        if let Err(e) = result {
            self.failure.get_or_insert(e);
        }
    }
}

pub struct Test;

impl Behavior for Test {
    fn run(
        &self,
        config: &ShmMutexConfiguration,
        events: &EventLog,
        iterations: u32,
    ) -> anyhow::Result<()> {
        let mutex = open_recorded(config, events)?;
        recovery::install(&mutex)?;

        let mut failure = None;
        let mut controller = Controller::new(
            &mutex,
            Instrumented {
                events,
                work: SimulatedWork::from_config(config),
                failure: &mut failure,
            },
            config.idle_pause(),
        );
        for i in 0..iterations {
            if i > 0 {
                std::thread::sleep(config.idle_pause());
            }
            controller
                .run_once()
                .with_context(|| format!("iteration {i}"))?;
        }
        drop(controller);
        match failure {
            Some(e) => Err(e.context("recording critical section")),
            None => Ok(()),
        }
    }
}
