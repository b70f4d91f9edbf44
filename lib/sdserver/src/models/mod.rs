// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Built-in model declarations.
//!
//! Each schema is declared on first use and cached for the life of the process, so the
//! environment overrides it bakes in are the ones present at that first call.

use std::sync::Arc;

use crate::error::{ConfigError, Result};
use crate::schema::ConfigSchema;

mod falcon;
mod flan_t5;
mod stable_diffusion;
mod stable_diffusion_xl;

pub use falcon::FalconConfig;
pub use flan_t5::FlanT5Config;
pub use stable_diffusion::StableDiffusionConfig;
pub use stable_diffusion_xl::StableDiffusionXlConfig;

type Declare = fn() -> Result<Arc<ConfigSchema>>;

const BUILTIN: &[Declare] = &[
    StableDiffusionConfig::schema,
    StableDiffusionXlConfig::schema,
    FlanT5Config::schema,
    FalconConfig::schema,
];

/// Every built-in schema, in a stable order.
pub fn registry() -> Result<Vec<Arc<ConfigSchema>>> {
    BUILTIN.iter().map(|declare| declare()).collect()
}

/// Find a built-in schema by start name (`flan-t5`), model name (`flan_t5`) or schema
/// name (`FlanT5Config`).
pub fn by_name(name: &str) -> Result<Arc<ConfigSchema>> {
    for declare in BUILTIN {
        let schema = declare()?;
        let settings = schema.settings();
        if settings.start_name() == name || settings.model_name() == name || schema.name() == name
        {
            return Ok(schema);
        }
    }
    Err(ConfigError::KeyNotFound(format!("model '{name}'")))
}
