// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::configuration::ShmMutexConfiguration;
use crate::mutex::{MutexError, SharedMutex};
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;

/// Work performed while the shared mutex is held, for the whole time it is held.
pub trait CriticalSection {
    fn execute(&mut self);
}

impl<F: FnMut()> CriticalSection for F {
    fn execute(&mut self) {
        self()
    }
}

/// Stand-in for real exclusive work: a fixed number of timed steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedWork {
    steps: u32,
    step_duration: Duration,
}

impl SimulatedWork {
    pub fn new(steps: u32, step_duration: Duration) -> Self {
        Self {
            steps,
            step_duration,
        }
    }

    pub fn from_config(config: &ShmMutexConfiguration) -> Self {
        Self::new(config.work_steps(), config.step_duration())
    }
}

impl CriticalSection for SimulatedWork {
    fn execute(&mut self) {
        for step in 1..=self.steps {
            info!("Simulating processing ({step}/{})...", self.steps);
            std::thread::sleep(self.step_duration);
        }
        info!("Done processing.");
    }
}

/// Repeatedly runs a critical section under the shared mutex.
pub struct Controller<'m, 'a, C> {
    mutex: &'m SharedMutex<'a>,
    section: C,
    idle_pause: Duration,
}

impl<'m, 'a, C: CriticalSection> Controller<'m, 'a, C> {
    pub fn new(mutex: &'m SharedMutex<'a>, section: C, idle_pause: Duration) -> Self {
        Self {
            mutex,
            section,
            idle_pause,
        }
    }

    /// acquire, execute the critical section, release.
    pub fn run_once(&mut self) -> Result<(), MutexError> {
        info!("Acquiring mutex lock...");
        self.mutex.acquire()?;
        self.section.execute();
        self.mutex.release()
    }

    /// Loops until an error occurs or the process is terminated.
    pub fn run(mut self) -> Result<Infallible, MutexError> {
        loop {
            self.run_once()?;
            std::thread::sleep(self.idle_pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::CONTROL_BLOCK_SIZE;
    use crate::segment::tests::TestSegmentName;
    use crate::segment::NamedSegment;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_section_runs_with_lock_held() {
        let name = TestSegmentName::new("controller_held");
        let (segment, role) = NamedSegment::open_or_create(&name.0, CONTROL_BLOCK_SIZE)
            .unwrap()
            .map()
            .unwrap();
        let mutex = SharedMutex::open(&segment, role).unwrap();
        let raw = mutex.as_raw();

        let mut observed = Vec::new();
        let mut controller = Controller::new(
            &mutex,
            || observed.push(unsafe { libc::pthread_mutex_trylock(raw) }),
            Duration::ZERO,
        );
        controller.run_once().unwrap();
        controller.run_once().unwrap();
        drop(controller);

        assert_eq!(observed, vec![libc::EBUSY, libc::EBUSY]);
        // Released after every iteration.
        assert_eq!(unsafe { libc::pthread_mutex_trylock(raw) }, 0);
        mutex.release().unwrap();
    }

    #[test]
    fn test_simulated_work_takes_configured_steps() {
        let config = ShmMutexConfiguration::default().with_work(3, Duration::from_millis(5));
        let mut work = SimulatedWork::from_config(&config);
        assert_eq!(work, SimulatedWork::new(3, Duration::from_millis(5)));

        let start = std::time::Instant::now();
        work.execute();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_zero_steps_does_not_sleep() {
        let mut work = SimulatedWork::new(0, Duration::from_secs(60));
        let start = std::time::Instant::now();
        work.execute();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
