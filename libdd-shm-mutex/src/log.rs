// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("Could not parse log level {level:?}: {source}")]
    Filter {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("A global logger is already installed")]
    AlreadyInstalled,
}

/// Installs the process-wide `tracing` subscriber writing plain lines to stdout.
///
/// Must not be relied upon from signal handlers: formatting allocates.
pub fn init(level: &str) -> Result<(), LogInitError> {
    let filter = EnvFilter::try_new(level).map_err(|source| LogInitError::Filter {
        level: level.to_owned(),
        source,
    })?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LogInitError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unparseable_level() {
        assert!(matches!(
            init("info,shm=notalevel"),
            Err(LogInitError::Filter { .. })
        ));
    }
}
