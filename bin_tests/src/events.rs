// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A tiny append-only log shared by every test app instance of a test.
//!
//! Each line is `<pid> <event> <nanoseconds since the epoch>`. Lines are short and written with
//! a single `write` on an `O_APPEND` descriptor, so concurrent writers do not interleave.

use anyhow::Context;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The process created the segment.
    Creator,
    /// The process attached to an existing segment.
    Attacher,
    /// The process ran the mutex initialization.
    Initialized,
    /// The process is ready to lock.
    Ready,
    /// Entered the critical section, lock held.
    Enter,
    /// Leaving the critical section, lock still held.
    Exit,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::Creator => "creator",
            EventKind::Attacher => "attacher",
            EventKind::Initialized => "initialized",
            EventKind::Ready => "ready",
            EventKind::Enter => "enter",
            EventKind::Exit => "exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "creator" => EventKind::Creator,
            "attacher" => EventKind::Attacher,
            "initialized" => EventKind::Initialized,
            "ready" => EventKind::Ready,
            "enter" => EventKind::Enter,
            "exit" => EventKind::Exit,
            _ => anyhow::bail!("Unknown event kind {s:?}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub pid: u32,
    pub kind: EventKind,
    pub at_nanos: u128,
}

impl FromStr for Event {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let (Some(pid), Some(kind), Some(at), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            anyhow::bail!("Malformed event line {line:?}");
        };
        Ok(Event {
            pid: pid.parse()?,
            kind: kind.parse()?,
            at_nanos: at.parse()?,
        })
    }
}

pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, kind: EventKind) -> anyhow::Result<()> {
        let at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let line = format!("{} {kind} {at}\n", std::process::id());
        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open file: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write to file: {}", self.path.display()))?;
        Ok(())
    }

    /// All events recorded so far. A missing log is an empty one.
    pub fn read(&self) -> anyhow::Result<Vec<Event>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> anyhow::Result<usize> {
        Ok(self.read()?.iter().filter(|e| e.kind == kind).count())
    }

    /// Polls the log until `predicate` holds or `timeout` elapses.
    pub fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&[Event]) -> bool,
    ) -> anyhow::Result<Vec<Event>> {
        let start = Instant::now();
        loop {
            let events = self.read()?;
            if predicate(&events) {
                return Ok(events);
            }
            if start.elapsed() >= timeout {
                anyhow::bail!(
                    "Timed out after {timeout:?} waiting on {}, events so far: {events:?}",
                    self.path.display()
                );
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Time spans during which some process held the lock, sorted by entry.
pub fn critical_sections(events: &[Event]) -> anyhow::Result<Vec<(u32, u128, u128)>> {
    let mut open: Vec<(u32, u128)> = vec![];
    let mut sections = vec![];
    for event in events {
        match event.kind {
            EventKind::Enter => open.push((event.pid, event.at_nanos)),
            EventKind::Exit => {
                let idx = open
                    .iter()
                    .position(|(pid, _)| *pid == event.pid)
                    .with_context(|| format!("exit without enter: {event:?}"))?;
                let (pid, entered) = open.remove(idx);
                sections.push((pid, entered, event.at_nanos));
            }
            _ => (),
        }
    }
    sections.sort_by_key(|(_, entered, _)| *entered);
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_line() {
        let event: Event = "42 enter 1000".parse().unwrap();
        assert_eq!(
            event,
            Event {
                pid: 42,
                kind: EventKind::Enter,
                at_nanos: 1000
            }
        );
        assert!("42 enter".parse::<Event>().is_err());
        assert!("42 bogus 1".parse::<Event>().is_err());
        assert!("42 enter 1 extra".parse::<Event>().is_err());
    }

    #[test]
    fn test_critical_sections_pair_by_pid() {
        let events: Vec<Event> = ["1 enter 10", "2 enter 15", "1 exit 20", "2 exit 30"]
            .iter()
            .map(|l| l.parse().unwrap())
            .collect();
        assert_eq!(
            critical_sections(&events).unwrap(),
            vec![(1, 10, 20), (2, 15, 30)]
        );
    }

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events"));
        assert!(log.read().unwrap().is_empty());
        log.record(EventKind::Creator).unwrap();
        log.record(EventKind::Ready).unwrap();
        let events = log.read().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.pid == std::process::id()));
        assert_eq!(log.count(EventKind::Ready).unwrap(), 1);
    }
}
