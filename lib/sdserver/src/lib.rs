// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! sdserver model configuration.
//!
//! Every supported model family declares a [`ConfigSchema`]: its checkpoint ids, serving
//! settings, extra fields and generation defaults. From that declaration the crate derives
//! environment variable names for every field, a command-line surface, and JSON
//! (de)serialisation of [`SdConfig`] instances.

pub mod backends;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod field;
pub mod generation;
pub mod instance;
pub mod logging;
pub mod models;
pub mod naming;
pub mod schema;
pub mod settings;

pub use backends::{Backend, BackendResolver, BackendSelection};
pub use env::{field_env_key, ModelEnv};
pub use error::{ConfigError, Result};
pub use field::{Field, FieldSpec, FieldType};
pub use generation::{GenerationConfig, GenerationSchema};
pub use instance::SdConfig;
pub use schema::{ConfigDeclaration, ConfigSchema, ConfigSchemaBuilder};
pub use settings::{ModelSettings, ModelType, NameType, ResolvedSettings, Runtime};
