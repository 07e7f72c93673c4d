// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::events::{EventKind, EventLog};
use anyhow::Result;
use libdd_shm_mutex::{open_segment, SharedMutex, ShmMutexConfiguration};
use std::str::FromStr;

use crate::modes::unix::*;

/// Defines what a test app instance does with the shared mutex
pub trait Behavior {
    fn run(&self, config: &ShmMutexConfiguration, events: &EventLog, iterations: u32)
        -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bring the mutex up and exit without locking it.
    InitOnly,
    /// Take the lock `iterations` times around instrumented simulated work.
    Work,
    /// Take the lock once and keep it until a signal arrives.
    Hold,
    /// Like `Hold`, after checking that recovery cannot be installed twice.
    Reinstall,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::InitOnly => "init_only",
            Mode::Work => "work",
            Mode::Hold => "hold",
            Mode::Reinstall => "reinstall",
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "init_only" => Mode::InitOnly,
            "work" => Mode::Work,
            "hold" => Mode::Hold,
            "reinstall" => Mode::Reinstall,
            _ => anyhow::bail!("Unknown mode: {s}"),
        })
    }
}

pub fn get_behavior(mode: Mode) -> Box<dyn Behavior> {
    match mode {
        Mode::InitOnly => Box::new(test_000_init_only::Test),
        Mode::Work => Box::new(test_001_work::Test),
        Mode::Hold => Box::new(test_002_hold::Test),
        Mode::Reinstall => Box::new(test_003_reinstall::Test),
    }
}

/// Brings up the mutex like the real program does, recording which role this process played.
/// The mapping is leaked so that the recovery handler may point at it.
pub fn open_recorded(
    config: &ShmMutexConfiguration,
    events: &EventLog,
) -> Result<SharedMutex<'static>> {
    let (segment, role) = open_segment(config)?;
    let creator = role.is_creator();
    events.record(if creator {
        EventKind::Creator
    } else {
        EventKind::Attacher
    })?;
    let segment = Box::leak(Box::new(segment));
    let mutex = SharedMutex::open(segment, role)?;
    if creator {
        events.record(EventKind::Initialized)?;
    }
    events.record(EventKind::Ready)?;
    Ok(mutex)
}
