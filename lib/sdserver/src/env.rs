// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable derivation for model configurations.
//!
//! Every declared field gets a variable of the form `SDSERVER_<MODEL>_[<SUFFIX>_]<FIELD>`;
//! [`ModelEnv`] holds the per-model variables that are not tied to a declared field.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

use crate::backends::Backend;
use crate::config::environment_names::PREFIX;
use crate::config::is_truthy;
use crate::error::{ConfigError, Result};
use crate::naming;

/// Canonical environment variable name for `key` of `model_name`.
///
/// Segments are upper-cased and joined with a single `_`; an empty or missing suffix is
/// dropped, and surrounding underscores on the suffix are ignored.
///
/// ```
/// use sdserver::env::field_env_key;
/// assert_eq!(field_env_key("model_a", "temperature", None), "SDSERVER_MODEL_A_TEMPERATURE");
/// assert_eq!(
///     field_env_key("model_a", "temperature", Some("generation")),
///     "SDSERVER_MODEL_A_GENERATION_TEMPERATURE"
/// );
/// ```
pub fn field_env_key(model_name: &str, key: &str, suffix: Option<&str>) -> String {
    let suffix = suffix.map(|s| s.trim_matches('_')).unwrap_or_default();
    [PREFIX, model_name, suffix, key]
        .iter()
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Read `var`, treating an empty value as unset.
pub(crate) fn read_var(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

/// Per-model table of derived environment variable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct ModelEnv {
    model_name: String,
    /// JSON blob holding a whole configuration
    config: String,
    model_id: String,
    pipeline: String,
    lora_weights: String,
    lora_dir: String,
    framework: String,
    bettertransformer: String,
}

impl ModelEnv {
    /// Framework used when the framework variable is unset.
    pub const DEFAULT_FRAMEWORK: &'static str = "pt";

    /// Logical keys accepted by [`ModelEnv::get`].
    pub const KEYS: &'static [&'static str] = &[
        "config",
        "model_id",
        "pipeline",
        "lora_weights",
        "lora_dir",
        "framework",
        "bettertransformer",
    ];

    pub fn new(model_name: &str) -> Self {
        let model_name = naming::underscore(model_name);
        let key = |attr: &str| field_env_key(&model_name, attr, None);
        ModelEnv {
            config: key("config"),
            model_id: key("model_id"),
            pipeline: key("pipeline"),
            lora_weights: key("lora_weights"),
            lora_dir: key("lora_dir"),
            framework: key("framework"),
            bettertransformer: key("bettertransformer"),
            model_name,
        }
    }

    /// Variable name for a logical key such as `"model_id"`.
    pub fn get(&self, key: &str) -> Result<&str> {
        let name = match key {
            "config" => &self.config,
            "model_id" => &self.model_id,
            "pipeline" => &self.pipeline,
            "lora_weights" => &self.lora_weights,
            "lora_dir" => &self.lora_dir,
            "framework" => &self.framework,
            "bettertransformer" => &self.bettertransformer,
            _ => {
                return Err(ConfigError::KeyNotFound(format!(
                    "{key} (model environment of '{}')",
                    self.model_name
                )))
            }
        };
        Ok(name.as_str())
    }

    /// Resolved framework, read from the environment on every call.
    pub fn framework_value(&self) -> String {
        read_var(&self.framework).unwrap_or_else(|| Self::DEFAULT_FRAMEWORK.to_string())
    }

    /// The numerical backend required by [`ModelEnv::framework_value`].
    pub fn framework_backend(&self) -> Result<Backend> {
        let value = self.framework_value();
        match value.to_lowercase().as_str() {
            "pt" | "torch" | "pytorch" => Ok(Backend::Torch),
            "tf" | "tensorflow" => Ok(Backend::Tensorflow),
            "flax" | "jax" => Ok(Backend::Flax),
            _ => Err(ConfigError::EnvDecode {
                var: self.framework.clone(),
                reason: format!("unknown framework '{value}' (expected pt, tf or flax)"),
            }),
        }
    }

    pub fn bettertransformer_value(&self) -> bool {
        read_var(&self.bettertransformer).is_some_and(|v| is_truthy(&v))
    }
}
