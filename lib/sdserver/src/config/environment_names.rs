// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable name constants used by sdserver itself.
//!
//! Per-model variables (`SDSERVER_<MODEL>_<FIELD>`) are derived at declaration time by
//! [`crate::env::field_env_key`] and are not listed here.
//!
//! ## Organization
//! - **Logging**: Log level, configuration file and output format
//! - **Backends**: Numerical backend selection and package discovery
//! - **Launcher**: Options of the `sdserver` binary

/// Prefix shared by every derived per-model variable.
pub const PREFIX: &str = "SDSERVER";

/// Logging and tracing environment variables
pub mod logging {
    /// Log level / filter directives (e.g., "debug", "sdserver=trace")
    pub const SDSERVER_LOG: &str = "SDSERVER_LOG";

    /// Path to logging configuration file
    pub const SDSERVER_LOGGING_CONFIG_PATH: &str = "SDSERVER_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const SDSERVER_LOGGING_JSONL: &str = "SDSERVER_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const SDSERVER_DISABLE_ANSI_LOGGING: &str = "SDSERVER_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const SDSERVER_LOG_USE_LOCAL_TZ: &str = "SDSERVER_LOG_USE_LOCAL_TZ";
}

/// Backend selection environment variables
///
/// Each accepts "AUTO" (default) or a truthy value; anything else disables the backend.
pub mod backends {
    pub const USE_TORCH: &str = "USE_TORCH";

    pub const USE_TF: &str = "USE_TF";

    pub const USE_FLAX: &str = "USE_FLAX";

    /// Report TensorFlow as available even without package metadata
    pub const FORCE_TF_AVAILABLE: &str = "FORCE_TF_AVAILABLE";

    /// Search path (platform path-list syntax) of Python site-packages directories
    pub const SDSERVER_SITE_PACKAGES: &str = "SDSERVER_SITE_PACKAGES";
}

/// `sdserver` launcher environment variables
pub mod launcher {
    /// Schema declaration file (TOML or JSON) added to the built-in models
    pub const SDSERVER_DECLARATION: &str = "SDSERVER_DECLARATION";
}
