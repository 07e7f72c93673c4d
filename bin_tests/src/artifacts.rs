// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared artifact definitions for bin_tests.
//!
//! This module contains all artifact configurations used by tests and the prebuild binary.

use crate::{ArtifactsBuild, BuildProfile};

/// Creates an ArtifactsBuild for the `shm-mutex` program itself.
pub fn shm_mutex(profile: BuildProfile) -> ArtifactsBuild {
    ArtifactsBuild {
        name: "shm-mutex".to_owned(),
        package: Some("libdd-shm-mutex".to_owned()),
        build_profile: profile,
    }
}

/// Creates an ArtifactsBuild for the instrumented shm_mutex_test_app binary.
pub fn shm_mutex_test_app(profile: BuildProfile) -> ArtifactsBuild {
    ArtifactsBuild {
        name: "shm_mutex_test_app".to_owned(),
        package: None,
        build_profile: profile,
    }
}

/// Every artifact the test suite needs, for pre-building.
pub fn all_prebuild_artifacts() -> Vec<ArtifactsBuild> {
    vec![
        shm_mutex(BuildProfile::Debug),
        shm_mutex_test_app(BuildProfile::Debug),
    ]
}
