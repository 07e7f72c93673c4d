// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-effort release of the shared mutex when the process is asked to terminate.
//!
//! A process killed while holding the lock would otherwise leave every other process blocked
//! forever. The handler installed here unlocks the mutex and exits with status 1.
//!
//! The unlock happens whether or not this process currently holds the lock. Unlocking a mutex
//! owned by somebody else is undefined behavior for `pthread_mutex_unlock`; we accept that in
//! exchange for never deadlocking the other processes when the signal lands inside the critical
//! section, which is the common case. Adding an ownership check would change which processes can
//! recover a stuck lock, so none is made.
//!
//! A second signal arriving while the handler for the first still runs is not handled specially.

use crate::mutex::SharedMutex;
use libc::{c_int, c_void, STDERR_FILENO};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, Signal};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr};

/// Termination signals that trigger the release. Every other signal keeps its disposition.
pub const RECOVERY_SIGNALS: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGSEGV,
];

// The handler cannot take arguments, so the mutex reaches it through this slot. It is written
// once, before any handler is installed, and only read afterwards. Atomics are async-signal safe
// where mutexes and allocation are not.
static RECOVERY_TARGET: AtomicPtr<libc::pthread_mutex_t> = AtomicPtr::new(ptr::null_mut());
static INSTALLED: AtomicBool = AtomicBool::new(false);

const CAUGHT_MSG: &[u8] = b"Caught signal, unlocking mutex.\n";
const UNLOCK_FAILED_MSG: &[u8] = b"Error unlocking mutex.\n";

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Attempted to install the shared mutex recovery handlers twice")]
    AlreadyInstalled,
    #[error("Unable to register handler for {signal}: {source}")]
    Register {
        signal: Signal,
        source: nix::Error,
    },
}

/// Installs the recovery handler for [`RECOVERY_SIGNALS`].
///
/// The mutex must be ready before this is called and must stay mapped until the process exits,
/// hence the `'static` bound. Only one mutex per process can be protected; a second call fails.
pub fn install(mutex: &SharedMutex<'static>) -> Result<(), RecoveryError> {
    if INSTALLED
        .compare_exchange(false, true, SeqCst, SeqCst)
        .is_err()
    {
        return Err(RecoveryError::AlreadyInstalled);
    }
    RECOVERY_TARGET.store(mutex.as_raw(), SeqCst);

    // Classic `signal()` semantics: restart interrupted calls, and the delivered signal is
    // blocked while its handler runs.
    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::SA_RESTART,
        signal::SigSet::empty(),
    );
    for signal in RECOVERY_SIGNALS {
        // Safety: the handler only touches async-signal-safe state and functions.
        unsafe { signal::sigaction(signal, &action) }
            .map_err(|source| RecoveryError::Register { signal, source })?;
    }
    Ok(())
}

// Only async-signal-safe calls below: write, pthread_mutex_unlock (in practice a futex call on
// the targets we support) and _exit.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
extern "C" fn handle_termination(_signum: c_int) {
    write_stderr(CAUGHT_MSG);
    let target = RECOVERY_TARGET.load(SeqCst);
    if !target.is_null() {
        // Safety: the slot only ever holds a mutex whose mapping lives until process exit.
        let status = unsafe { libc::pthread_mutex_unlock(target) };
        if status != 0 {
            write_stderr(UNLOCK_FAILED_MSG);
        }
    }
    // Safety: no preconditions. Skips atexit handlers, which are not signal safe.
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

fn write_stderr(msg: &[u8]) {
    // Safety: `msg` is a valid static buffer. Nothing useful can be done on a short write.
    unsafe {
        _ = libc::write(STDERR_FILENO, msg.as_ptr() as *const c_void, msg.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_signals_cover_termination_requests_and_segfault() {
        let signals: Vec<c_int> = RECOVERY_SIGNALS.iter().map(|s| *s as c_int).collect();
        assert_eq!(
            signals,
            vec![libc::SIGINT, libc::SIGQUIT, libc::SIGTERM, libc::SIGSEGV]
        );
    }

    #[test]
    fn test_diagnostics_are_single_lines() {
        for msg in [CAUGHT_MSG, UNLOCK_FAILED_MSG] {
            assert_eq!(msg.iter().filter(|b| **b == b'\n').count(), 1);
            assert_eq!(msg.last(), Some(&b'\n'));
        }
    }
}
