// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod environment_names;

pub use sdserver_config::{env_is_truthy, is_truthy};

/// Check whether JSONL logging enabled
/// Set the `SDSERVER_LOGGING_JSONL` environment variable a [`is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(environment_names::logging::SDSERVER_LOGGING_JSONL)
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
/// Set the `SDSERVER_DISABLE_ANSI_LOGGING` environment variable a [`is_truthy`] value
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(environment_names::logging::SDSERVER_DISABLE_ANSI_LOGGING)
}

/// Check whether to use local timezone for logging timestamps (default is UTC)
pub fn use_local_timezone() -> bool {
    env_is_truthy(environment_names::logging::SDSERVER_LOG_USE_LOCAL_TZ)
}
