// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::segment::{CreatorClaim, MappedSegment, SegmentRole};
use nix::errno::Errno;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use tracing::info;

/// Bytes of shared memory needed to hold the mutex control block.
pub const CONTROL_BLOCK_SIZE: usize = std::mem::size_of::<libc::pthread_mutex_t>();

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum MutexError {
    #[error(
        "Shared segment of {actual} bytes is too small for a mutex of {} bytes",
        CONTROL_BLOCK_SIZE
    )]
    SegmentTooSmall { actual: usize },
    #[error("Error during pthread attribute init: {0}")]
    AttributeInit(Errno),
    #[error("Error during pthread attribute set: {0}")]
    AttributeSet(Errno),
    #[error("Error during pthread init: {0}")]
    Init(Errno),
    #[error("Error during mutex lock: {0}")]
    Lock(Errno),
    #[error("Error during mutex unlock: {0}")]
    Unlock(Errno),
}

fn check(ret: libc::c_int, err: fn(Errno) -> MutexError) -> Result<(), MutexError> {
    if ret == 0 {
        Ok(())
    } else {
        Err(err(Errno::from_raw(ret)))
    }
}

/// A `pthread_mutex_t` configured as `PTHREAD_PROCESS_SHARED`, living at offset 0 of a shared
/// segment. Every process attached to the segment sees the same lock through its own mapping.
///
/// The lock is acquired and released explicitly rather than through a guard: the release path
/// is also driven from the signal handler in [`crate::recovery`], which has no guard to drop.
#[derive(Debug)]
pub struct SharedMutex<'a> {
    raw: NonNull<libc::pthread_mutex_t>,
    _segment: PhantomData<&'a MappedSegment>,
}

// The control block is built to be shared between processes, so threads are no concern.
unsafe impl Send for SharedMutex<'_> {}
unsafe impl Sync for SharedMutex<'_> {}

impl<'a> SharedMutex<'a> {
    /// Initializes the mutex if `role` says this process created the segment, otherwise
    /// attaches to the mutex the creator set up.
    pub fn open(segment: &'a MappedSegment, role: SegmentRole) -> Result<Self, MutexError> {
        match role {
            SegmentRole::Creator(claim) => Self::initialize(segment, claim),
            SegmentRole::Attacher => {
                info!("No need to initialize mutex object.");
                Self::attach(segment)
            }
        }
    }

    /// Builds the process-shared mutex in place. Consuming the [`CreatorClaim`] makes a second
    /// initialization of the same segment impossible to express.
    pub fn initialize(
        segment: &'a MappedSegment,
        _claim: CreatorClaim,
    ) -> Result<Self, MutexError> {
        let mutex = Self::attach(segment)?;
        info!("Initializing mutex.");

        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // Safety: `attr` is only read after pthread_mutexattr_init succeeded, and destroyed
        // exactly once on every path after that.
        unsafe {
            check(
                libc::pthread_mutexattr_init(attr.as_mut_ptr()),
                MutexError::AttributeInit,
            )?;
            let result = check(
                libc::pthread_mutexattr_setpshared(
                    attr.as_mut_ptr(),
                    libc::PTHREAD_PROCESS_SHARED,
                ),
                MutexError::AttributeSet,
            )
            .and_then(|_| {
                check(
                    libc::pthread_mutex_init(mutex.raw.as_ptr(), attr.as_ptr()),
                    MutexError::Init,
                )
            });
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            result?;
        }
        Ok(mutex)
    }

    /// Uses the mutex another process initialized in `segment`.
    ///
    /// Nothing here checks that the creator is done initializing. Locking before it is done races
    /// with `pthread_mutex_init` in the creator, see [`crate::open_shared_mutex`].
    pub fn attach(segment: &'a MappedSegment) -> Result<Self, MutexError> {
        if segment.size() < CONTROL_BLOCK_SIZE {
            return Err(MutexError::SegmentTooSmall {
                actual: segment.size(),
            });
        }
        Ok(Self {
            raw: segment.as_ptr().cast(),
            _segment: PhantomData,
        })
    }

    /// Blocks until the mutex is free, then takes it. There is no timeout.
    pub fn acquire(&self) -> Result<(), MutexError> {
        // Safety: `raw` points into a mapping that outlives `'a`.
        check(
            unsafe { libc::pthread_mutex_lock(self.raw.as_ptr()) },
            MutexError::Lock,
        )
    }

    pub fn release(&self) -> Result<(), MutexError> {
        // Safety: as in `acquire`.
        check(
            unsafe { libc::pthread_mutex_unlock(self.raw.as_ptr()) },
            MutexError::Unlock,
        )
    }

    pub(crate) fn as_raw(&self) -> *mut libc::pthread_mutex_t {
        self.raw.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::tests::TestSegmentName;
    use crate::segment::NamedSegment;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn try_lock(mutex: &SharedMutex) -> libc::c_int {
        unsafe { libc::pthread_mutex_trylock(mutex.as_raw()) }
    }

    fn map(name: &TestSegmentName) -> (MappedSegment, SegmentRole) {
        NamedSegment::open_or_create(&name.0, CONTROL_BLOCK_SIZE)
            .unwrap()
            .map()
            .unwrap()
    }

    #[test]
    fn test_control_block_fits_a_pthread_mutex() {
        assert!(CONTROL_BLOCK_SIZE > 0);
        assert_eq!(
            CONTROL_BLOCK_SIZE,
            std::mem::size_of::<libc::pthread_mutex_t>()
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_lock_is_visible_through_every_mapping() {
        let name = TestSegmentName::new("visible");
        let (creator_segment, creator_role) = map(&name);
        let (attacher_segment, attacher_role) = map(&name);
        assert!(creator_role.is_creator());
        assert!(!attacher_role.is_creator());

        let creator = SharedMutex::open(&creator_segment, creator_role).unwrap();
        let attacher = SharedMutex::open(&attacher_segment, attacher_role).unwrap();

        creator.acquire().unwrap();
        assert_eq!(try_lock(&attacher), libc::EBUSY);
        creator.release().unwrap();

        attacher.acquire().unwrap();
        assert_eq!(try_lock(&creator), libc::EBUSY);
        attacher.release().unwrap();

        assert_eq!(try_lock(&creator), 0);
        creator.release().unwrap();
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_acquire_blocks_until_released_elsewhere() {
        let name = TestSegmentName::new("blocks");
        let (creator_segment, creator_role) = map(&name);
        let (attacher_segment, attacher_role) = map(&name);
        let creator = SharedMutex::open(&creator_segment, creator_role).unwrap();
        let attacher = SharedMutex::open(&attacher_segment, attacher_role).unwrap();
        creator.acquire().unwrap();

        let acquired = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                attacher.acquire().unwrap();
                acquired.store(true, Ordering::SeqCst);
                attacher.release().unwrap();
            });
            std::thread::sleep(Duration::from_millis(100));
            assert!(!acquired.load(Ordering::SeqCst));
            creator.release().unwrap();
        });
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_attach_rejects_undersized_segment() {
        let name = TestSegmentName::new("undersized");
        let (segment, _role) = NamedSegment::open_or_create(&name.0, 1)
            .unwrap()
            .map()
            .unwrap();
        assert_eq!(
            SharedMutex::attach(&segment).unwrap_err(),
            MutexError::SegmentTooSmall { actual: 1 }
        );
    }
}
