// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
pub mod test_000_init_only;
pub mod test_001_work;
pub mod test_002_hold;
pub mod test_003_reinstall;
