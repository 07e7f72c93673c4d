// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ffi::{CStr, CString};
use std::str::FromStr;
use std::time::Duration;

/// Segment name used when `SHM_MUTEX_NAME` is not set.
pub const DEFAULT_SEGMENT_NAME: &CStr = c"/libdd_shm_mutex";
pub const DEFAULT_WORK_STEPS: u32 = 5;
pub const DEFAULT_STEP_DURATION: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_PAUSE: Duration = Duration::from_secs(1);
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOG_LEVEL: &str = "info";

// POSIX leaves the limit to NAME_MAX, which is 255 on Linux and the BSDs.
const MAX_NAME_LEN: usize = 255;

pub mod env_vars {
    pub const NAME: &str = "SHM_MUTEX_NAME";
    pub const WORK_STEPS: &str = "SHM_MUTEX_WORK_STEPS";
    pub const STEP_DURATION: &str = "SHM_MUTEX_STEP_DURATION";
    pub const IDLE_PAUSE: &str = "SHM_MUTEX_IDLE_PAUSE";
    pub const ATTACH_TIMEOUT: &str = "SHM_MUTEX_ATTACH_TIMEOUT";
    pub const LOG_LEVEL: &str = "SHM_MUTEX_LOG_LEVEL";
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid segment name {0:?}: must start with '/' and contain no other '/'")]
    MalformedName(String),
    #[error("Invalid segment name {0:?}: must be between 1 and 255 bytes after the leading '/'")]
    NameLength(String),
    #[error("Invalid segment name {0:?}: contains a NUL byte")]
    NulInName(String),
    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// A validated name for a POSIX shared memory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName(CString);

impl SegmentName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        let Some(rest) = name.strip_prefix('/') else {
            return Err(ConfigError::MalformedName(name.to_owned()));
        };
        if rest.contains('/') {
            return Err(ConfigError::MalformedName(name.to_owned()));
        }
        if rest.is_empty() || rest.len() > MAX_NAME_LEN {
            return Err(ConfigError::NameLength(name.to_owned()));
        }
        let name = CString::new(name).map_err(|_| ConfigError::NulInName(name.to_owned()))?;
        Ok(Self(name))
    }

    pub fn as_c_str(&self) -> &CStr {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Built from a &str, so always valid UTF-8.
        self.0.to_str().unwrap_or_default()
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Everything a shared mutex process needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmMutexConfiguration {
    segment_name: SegmentName,
    work_steps: u32,
    step_duration: Duration,
    idle_pause: Duration,
    attach_timeout: Duration,
    log_level: String,
}

impl Default for ShmMutexConfiguration {
    fn default() -> Self {
        Self {
            segment_name: SegmentName(DEFAULT_SEGMENT_NAME.to_owned()),
            work_steps: DEFAULT_WORK_STEPS,
            step_duration: DEFAULT_STEP_DURATION,
            idle_pause: DEFAULT_IDLE_PAUSE,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
        }
    }
}

impl ShmMutexConfiguration {
    pub fn new(segment_name: SegmentName) -> Self {
        Self {
            segment_name,
            ..Default::default()
        }
    }

    /// Reads the configuration from the process environment.
    /// Unset or empty variables fall back to the defaults, malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(name) = parse_env::str_not_empty(&lookup, env_vars::NAME) {
            config.segment_name = SegmentName::new(&name)?;
        }
        if let Some(steps) = parse_env::int(&lookup, env_vars::WORK_STEPS)? {
            config.work_steps = steps;
        }
        if let Some(step) = parse_env::duration(&lookup, env_vars::STEP_DURATION)? {
            config.step_duration = step;
        }
        if let Some(pause) = parse_env::duration(&lookup, env_vars::IDLE_PAUSE)? {
            config.idle_pause = pause;
        }
        if let Some(timeout) = parse_env::duration(&lookup, env_vars::ATTACH_TIMEOUT)? {
            config.attach_timeout = timeout;
        }
        if let Some(level) = parse_env::str_not_empty(&lookup, env_vars::LOG_LEVEL) {
            config.log_level = level;
        }
        Ok(config)
    }

    pub fn segment_name(&self) -> &SegmentName {
        &self.segment_name
    }

    pub fn work_steps(&self) -> u32 {
        self.work_steps
    }

    pub fn step_duration(&self) -> Duration {
        self.step_duration
    }

    pub fn idle_pause(&self) -> Duration {
        self.idle_pause
    }

    pub fn attach_timeout(&self) -> Duration {
        self.attach_timeout
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn with_work(mut self, steps: u32, step_duration: Duration) -> Self {
        self.work_steps = steps;
        self.step_duration = step_duration;
        self
    }

    pub fn with_idle_pause(mut self, idle_pause: Duration) -> Self {
        self.idle_pause = idle_pause;
        self
    }

    pub fn with_attach_timeout(mut self, attach_timeout: Duration) -> Self {
        self.attach_timeout = attach_timeout;
        self
    }
}

mod parse_env {
    use super::ConfigError;
    use std::str::FromStr;
    use std::time::Duration;

    pub fn str_not_empty<F>(lookup: &F, name: &str) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(name).filter(|s| !s.is_empty())
    }

    pub fn int<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        T: FromStr,
    {
        str_not_empty(lookup, name)
            .map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .map_err(|_| ConfigError::InvalidValue { name, value })
            })
            .transpose()
    }

    /// Durations are given in (possibly fractional) seconds.
    pub fn duration<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        str_not_empty(lookup, name)
            .map(|value| {
                value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or(ConfigError::InvalidValue { name, value })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_match_compiled_in_values() {
        let config = ShmMutexConfiguration::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.segment_name().as_c_str(), DEFAULT_SEGMENT_NAME);
        assert_eq!(config.work_steps(), 5);
        assert_eq!(config.step_duration(), Duration::from_secs(1));
        assert_eq!(config.idle_pause(), Duration::from_secs(1));
        assert_eq!(config.log_level(), "info");
        assert_eq!(config, ShmMutexConfiguration::default());
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = ShmMutexConfiguration::from_lookup(lookup(&[
            (env_vars::NAME, "/other_mutex"),
            (env_vars::WORK_STEPS, "2"),
            (env_vars::STEP_DURATION, "0.25"),
            (env_vars::IDLE_PAUSE, "0"),
            (env_vars::ATTACH_TIMEOUT, "1.5"),
            (env_vars::LOG_LEVEL, "debug"),
        ]))
        .unwrap();
        assert_eq!(config.segment_name().as_str(), "/other_mutex");
        assert_eq!(config.work_steps(), 2);
        assert_eq!(config.step_duration(), Duration::from_millis(250));
        assert_eq!(config.idle_pause(), Duration::ZERO);
        assert_eq!(config.attach_timeout(), Duration::from_millis(1500));
        assert_eq!(config.log_level(), "debug");
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = ShmMutexConfiguration::from_lookup(lookup(&[
            (env_vars::NAME, ""),
            (env_vars::WORK_STEPS, ""),
        ]))
        .unwrap();
        assert_eq!(config, ShmMutexConfiguration::default());
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert_eq!(
            ShmMutexConfiguration::from_lookup(lookup(&[(env_vars::WORK_STEPS, "five")])),
            Err(ConfigError::InvalidValue {
                name: env_vars::WORK_STEPS,
                value: "five".to_owned()
            })
        );
        assert!(matches!(
            ShmMutexConfiguration::from_lookup(lookup(&[(env_vars::IDLE_PAUSE, "-1")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_segment_name_passes_validation() {
        let validated = SegmentName::new(DEFAULT_SEGMENT_NAME.to_str().unwrap()).unwrap();
        assert_eq!(&validated, ShmMutexConfiguration::default().segment_name());
        assert_eq!(validated.as_str(), "/libdd_shm_mutex");
    }

    #[test]
    fn test_segment_name_validation() {
        assert!(SegmentName::new("/ok").is_ok());
        assert!(matches!(
            SegmentName::new("no_slash"),
            Err(ConfigError::MalformedName(_))
        ));
        assert!(matches!(
            SegmentName::new("/a/b"),
            Err(ConfigError::MalformedName(_))
        ));
        assert!(matches!(
            SegmentName::new("/"),
            Err(ConfigError::NameLength(_))
        ));
        assert!(matches!(
            SegmentName::new(&format!("/{}", "x".repeat(256))),
            Err(ConfigError::NameLength(_))
        ));
        assert!(matches!(
            SegmentName::new("/nul\0byte"),
            Err(ConfigError::NulInName(_))
        ));
    }
}
