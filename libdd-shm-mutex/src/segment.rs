// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Creation and attachment of the named shared memory segment backing a shared mutex.
//!
//! Exactly one process wins the exclusive `shm_open` and becomes the creator: it alone sizes
//! the segment and later initializes its contents. Everybody else attaches to what is already
//! there and must never resize it, since truncating a live segment would wipe the mutex state
//! of processes already using it.

use crate::configuration::SegmentName;
use libc::off_t;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::{close, ftruncate};
use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SIZE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum SegmentError {
    #[error("Error during shm_open of {name}: {source}")]
    Open { name: String, source: Errno },
    #[error("Error during ftruncate: {0}")]
    Truncate(Errno),
    #[error("Error during fstat: {0}")]
    Stat(Errno),
    #[error("Timed out after {0:?} waiting for the creator to size the shared segment")]
    SizeTimeout(Duration),
    #[error("Error during mmap: {0}")]
    Map(Errno),
    #[error("Error during close: {0}")]
    Close(Errno),
    #[error("Cannot map a shared segment of size zero")]
    ZeroSize,
}

/// Proof that the holder created the segment and is therefore the one process allowed to
/// initialize its contents. It can only be obtained from [`NamedSegment::open_or_create`] and
/// is consumed by initialization, so a segment cannot be initialized twice.
#[derive(Debug)]
pub struct CreatorClaim {
    _private: (),
}

#[derive(Debug)]
pub enum SegmentRole {
    Creator(CreatorClaim),
    Attacher,
}

impl SegmentRole {
    pub fn is_creator(&self) -> bool {
        matches!(self, SegmentRole::Creator(_))
    }
}

/// An open, not yet mapped, shared memory object.
#[derive(Debug)]
pub struct NamedSegment {
    file: File,
    size: usize,
    role: SegmentRole,
}

impl NamedSegment {
    /// Creates `name` exclusively, or opens it if another process got there first.
    ///
    /// A freshly created segment is extended to `size` bytes before this returns. An attached
    /// one is left untouched.
    pub fn open_or_create(name: &SegmentName, size: usize) -> Result<Self, SegmentError> {
        if size == 0 {
            return Err(SegmentError::ZeroSize);
        }
        let open_error = |source| SegmentError::Open {
            name: name.to_string(),
            source,
        };
        let (fd, role) = match shm_open(
            name.as_c_str(),
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => {
                info!("Created shared file.");
                (fd, SegmentRole::Creator(CreatorClaim { _private: () }))
            }
            Err(Errno::EEXIST) => {
                info!("Shared file already exists.");
                let fd = shm_open(
                    name.as_c_str(),
                    OFlag::O_RDWR,
                    Mode::S_IRUSR | Mode::S_IWUSR,
                )
                .map_err(open_error)?;
                (fd, SegmentRole::Attacher)
            }
            Err(e) => return Err(open_error(e)),
        };

        let segment = NamedSegment {
            file: File::from(fd),
            size,
            role,
        };
        if segment.role.is_creator() {
            info!("Truncating shared file.");
            ftruncate(&segment.file, size as off_t).map_err(SegmentError::Truncate)?;
        } else {
            info!("No need to truncate shared file.");
        }
        Ok(segment)
    }

    pub fn role(&self) -> &SegmentRole {
        &self.role
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the backing object as currently seen by the kernel.
    pub fn current_size(&self) -> Result<u64, SegmentError> {
        let stat = fstat(self.file.as_raw_fd()).map_err(SegmentError::Stat)?;
        Ok(stat.st_size as u64)
    }

    /// Blocks until the creator has extended the segment to the expected size.
    ///
    /// Only ever observes the size: an attacher racing the creator must not touch it. Touching
    /// mapped pages past the end of the object raises `SIGBUS`, hence the wait.
    pub fn wait_until_sized(&self, timeout: Duration) -> Result<(), SegmentError> {
        let start = Instant::now();
        loop {
            if self.current_size()? >= self.size as u64 {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(SegmentError::SizeTimeout(timeout));
            }
            std::thread::sleep(SIZE_POLL_INTERVAL);
        }
    }

    /// Maps the segment shared and read-write, then closes the descriptor.
    /// The mapping keeps the object reachable on its own.
    pub fn map(self) -> Result<(MappedSegment, SegmentRole), SegmentError> {
        let NamedSegment { file, size, role } = self;
        let len = NonZeroUsize::new(size).ok_or(SegmentError::ZeroSize)?;
        info!(
            "Using file descriptor {} for shared file.",
            file.as_raw_fd()
        );
        // Safety: a fresh mapping chosen by the kernel does not alias anything we own.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(SegmentError::Map)?;
        let mapped = MappedSegment { ptr, size };
        info!("Memory mapped shared file to mutex object.");

        close(file.into_raw_fd()).map_err(SegmentError::Close)?;
        debug!("Closed shared file descriptor, mapping stays valid.");
        Ok((mapped, role))
    }
}

/// A live shared mapping of a segment. Unmapped on drop; the program leaks it instead so that
/// the signal handler can rely on it for the rest of the process lifetime.
#[derive(Debug)]
pub struct MappedSegment {
    ptr: NonNull<c_void>,
    size: usize,
}

impl MappedSegment {
    pub fn as_ptr(&self) -> NonNull<c_void> {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedSegment {
    fn drop(&mut self) {
        // Safety: `ptr` and `size` come from a successful mmap and are unmapped only here.
        unsafe {
            _ = munmap(self.ptr, self.size);
        }
    }
}

// The mapping is plain shared memory; synchronization is up to whatever lives inside it.
unsafe impl Send for MappedSegment {}
unsafe impl Sync for MappedSegment {}

/// Removes `name` from the shared memory namespace. The shared mutex program never does this;
/// it is meant for tooling and tests cleaning up after themselves.
pub fn unlink(name: &SegmentName) -> Result<(), Errno> {
    shm_unlink(name.as_c_str())
}
