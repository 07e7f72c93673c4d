// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! A mutex shared by unrelated processes through a named POSIX shared memory segment.
//!
//! Any process that knows the segment name can take part: the first one to create the segment
//! initializes a `PTHREAD_PROCESS_SHARED` mutex at its start, later ones attach to it. A
//! recovery handler releases the mutex when the process is interrupted or terminated so that a
//! dying holder does not leave everyone else waiting forever.
//!
//! Typical use:
//!
//! ```no_run
//! use libdd_shm_mutex::{open_shared_mutex, recovery, Controller, ShmMutexConfiguration};
//!
//! let config = ShmMutexConfiguration::from_env()?;
//! let mutex = open_shared_mutex(&config)?;
//! recovery::install(&mutex)?;
//! Controller::new(&mutex, || { /* exclusive work */ }, config.idle_pause()).run()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod configuration;
pub mod controller;
pub mod log;
pub mod mutex;
pub mod recovery;
pub mod segment;

pub use configuration::{ConfigError, SegmentName, ShmMutexConfiguration};
pub use controller::{Controller, CriticalSection, SimulatedWork};
pub use mutex::{MutexError, SharedMutex, CONTROL_BLOCK_SIZE};
pub use recovery::RecoveryError;
pub use segment::{MappedSegment, NamedSegment, SegmentError, SegmentRole};

use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ShmMutexError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Mutex(#[from] MutexError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Creates or attaches to the segment named in `config` and maps it.
///
/// Only the creator sizes the segment. An attacher waits until the creator has done so, and never
/// resizes it itself. The returned role tells [`SharedMutex::open`] whether to initialize.
pub fn open_segment(
    config: &ShmMutexConfiguration,
) -> Result<(MappedSegment, SegmentRole), ShmMutexError> {
    let segment = NamedSegment::open_or_create(config.segment_name(), CONTROL_BLOCK_SIZE)?;
    if !segment.role().is_creator() {
        segment.wait_until_sized(config.attach_timeout())?;
    }
    Ok(segment.map()?)
}

/// Brings up the shared mutex named in `config`, ready to be locked.
///
/// The mapping is never unmapped: the mutex has to stay reachable from the recovery handler for
/// the rest of the process lifetime.
///
/// An attacher does not wait for the creator to finish initializing the mutex, only for the
/// segment to be sized. Until the creator's `pthread_mutex_init` returns, an attacher may lock
/// the still zeroed control block; on glibc that block reads as an unlocked default mutex, but a
/// lock taken in that window is not guaranteed to survive the creator's initialization.
pub fn open_shared_mutex(
    config: &ShmMutexConfiguration,
) -> Result<SharedMutex<'static>, ShmMutexError> {
    let (segment, role) = open_segment(config)?;
    let segment: &'static MappedSegment = Box::leak(Box::new(segment));
    let mutex = SharedMutex::open(segment, role)?;
    info!("Shared mutex ready.");
    Ok(mutex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::tests::TestSegmentName;
    use std::time::Duration;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_second_open_attaches_to_usable_mutex() {
        let name = TestSegmentName::new("lib_open");
        let config = ShmMutexConfiguration::new(name.0.clone());

        let (created, created_role) = open_segment(&config).unwrap();
        assert!(created_role.is_creator());
        let creator = SharedMutex::open(&created, created_role).unwrap();
        creator.acquire().unwrap();

        let attacher = open_shared_mutex(&config).unwrap();
        creator.release().unwrap();
        attacher.acquire().unwrap();
        attacher.release().unwrap();
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_attacher_gives_up_on_unsized_segment() {
        let name = TestSegmentName::new("lib_unsized");
        let config = ShmMutexConfiguration::new(name.0.clone())
            .with_attach_timeout(Duration::from_millis(5));
        // A creator that has not extended the object to the mutex size yet.
        let _stalled_creator = NamedSegment::open_or_create(&name.0, 1).unwrap();

        assert!(matches!(
            open_segment(&config),
            Err(ShmMutexError::Segment(SegmentError::SizeTimeout(_)))
        ));
    }
}
