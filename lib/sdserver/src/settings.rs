// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-model settings: the declared block an author writes, and the resolved record the
//! schema keeps for its lifetime.

use derive_builder::Builder;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use validator::Validate;

use crate::env::ModelEnv;
use crate::error::{ConfigError, Result};
use crate::naming;

/// Settings key reserved for the generated generation type.
pub const GENERATION_CLASS: &str = "generation_class";

/// Default serving timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 36_000_000;

/// Default number of workers per resource.
pub const DEFAULT_WORKERS_PER_RESOURCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NameType {
    /// `StableDiffusion` -> model `stable_diffusion`, start name `stable-diffusion`
    #[default]
    Dasherize,
    /// `StableDiffusion` -> `stablediffusion` for both
    Lowercase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelType {
    #[default]
    CausalLm,
    Seq2seqLm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Runtime {
    #[default]
    Transformers,
    Cpp,
}

/// The settings block declared for a model.
///
/// Only `default_id` and `model_ids` are required; everything else falls back to the
/// library defaults when the schema is declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Builder, Validate)]
#[serde(deny_unknown_fields)]
#[builder(default, build_fn(private, name = "build_internal"), derive(Debug))]
pub struct ModelSettings {
    /// Model id used by `sdserver start <model>` when none is given.
    #[validate(length(min = 1))]
    #[serde(default)]
    #[builder(setter(into), default)]
    pub default_id: String,

    /// Supported pretrained model ids.
    #[validate(length(min = 1))]
    #[serde(default)]
    #[builder(setter(custom), default)]
    pub model_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub url: Option<String>,

    /// Model only runs on GPU. Forces `bettertransformer` off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub requires_gpu: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub trust_remote_code: Option<bool>,

    /// Extra packages the model needs at runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(custom))]
    pub requirements: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub name_type: Option<NameType>,

    /// Serving timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub timeout: Option<u64>,

    /// 0.5 means one worker per two resources, 2 means two workers per resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub workers_per_resource: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub use_pipeline: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub model_type: Option<ModelType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub runtime: Option<Runtime>,

    /// When unset, read from the model's `BETTERTRANSFORMER` variable at declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    pub bettertransformer: Option<bool>,
}

impl ModelSettings {
    /// Keys accepted in a settings mapping.
    pub const FIELDS: &'static [&'static str] = &[
        "default_id",
        "model_ids",
        "url",
        "requires_gpu",
        "trust_remote_code",
        "requirements",
        "name_type",
        "timeout",
        "workers_per_resource",
        "use_pipeline",
        "model_type",
        "runtime",
        "bettertransformer",
    ];

    pub fn builder() -> ModelSettingsBuilder {
        ModelSettingsBuilder::default()
    }

    /// Parse a raw settings mapping (declaration file, derivation overrides).
    pub fn from_map(schema: &str, map: Map<String, Value>) -> Result<Self> {
        if map.contains_key(GENERATION_CLASS) {
            return Err(ConfigError::ReservedSettingsKey {
                schema: schema.to_string(),
                key: GENERATION_CLASS.to_string(),
            });
        }
        let settings: ModelSettings = serde_json::from_value(Value::Object(map))?;
        settings.check()?;
        Ok(settings)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Required fields must be non-empty.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| {
            ConfigError::MissingSettings(format!(
                "Either 'default_id' or 'model_ids' are empty in the settings (required fields): {e}"
            ))
        })
    }
}

impl ModelSettingsBuilder {
    pub fn model_ids<I, S>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn requirements<I, S>(&mut self, requirements: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = Some(Some(requirements.into_iter().map(Into::into).collect()));
        self
    }

    /// Build and validate the settings block
    pub fn build(&self) -> Result<ModelSettings> {
        let settings = self
            .build_internal()
            .map_err(|e| ConfigError::MissingSettings(e.to_string()))?;
        settings.check()?;
        Ok(settings)
    }
}

/// Normalized, read-only settings of a declared schema.
#[derive(Debug, Clone, PartialEq, Serialize, Getters)]
pub struct ResolvedSettings {
    default_id: String,
    model_ids: Vec<String>,
    url: String,
    requires_gpu: bool,
    trust_remote_code: bool,
    requirements: Option<Vec<String>>,
    name_type: NameType,
    timeout: u64,
    workers_per_resource: f64,
    use_pipeline: bool,
    model_type: ModelType,
    runtime: Runtime,
    bettertransformer: bool,

    /// Normalized name, determined by `name_type`
    model_name: String,
    /// Name used on the command line
    start_name: String,
    service_name: String,
    env: ModelEnv,
    generation_class: String,
}

impl ResolvedSettings {
    /// Keys derived from the schema name; never accepted from a settings block.
    pub const DERIVED: &'static [&'static str] =
        &["model_name", "start_name", "service_name", "env", GENERATION_CLASS];

    /// Resolve `declared` for the schema whose name without the `Config` suffix is `stem`.
    pub(crate) fn resolve(stem: &str, declared: &ModelSettings) -> Result<Self> {
        declared.check()?;

        let name_type = declared.name_type.unwrap_or_default();
        let model_name = match name_type {
            NameType::Dasherize => naming::underscore(stem),
            NameType::Lowercase => stem.to_lowercase(),
        };
        let start_name = match name_type {
            NameType::Dasherize => naming::dasherize(&model_name),
            NameType::Lowercase => model_name.clone(),
        };
        let env = ModelEnv::new(&model_name);
        let requires_gpu = declared.requires_gpu.unwrap_or(false);

        // quantization path: no bettertransformer on GPU-only models
        let bettertransformer = !requires_gpu
            && declared
                .bettertransformer
                .unwrap_or_else(|| env.bettertransformer_value());

        Ok(ResolvedSettings {
            default_id: declared.default_id.clone(),
            model_ids: declared.model_ids.clone(),
            url: declared.url.clone().unwrap_or_default(),
            requires_gpu,
            trust_remote_code: declared.trust_remote_code.unwrap_or(false),
            requirements: declared.requirements.clone(),
            name_type,
            timeout: declared.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            workers_per_resource: declared
                .workers_per_resource
                .unwrap_or(DEFAULT_WORKERS_PER_RESOURCE),
            use_pipeline: declared.use_pipeline.unwrap_or(false),
            model_type: declared.model_type.unwrap_or_default(),
            runtime: declared.runtime.unwrap_or_default(),
            bettertransformer,
            service_name: format!("generated_{model_name}_service.py"),
            generation_class: format!("{stem}GenerationConfig"),
            start_name,
            env,
            model_name,
        })
    }

    /// The record as a JSON map, for keyed lookups.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared() -> ModelSettings {
        ModelSettings::builder()
            .default_id("org/model-a")
            .model_ids(["org/model-a", "org/model-b"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_ids() {
        let err = ModelSettings::builder()
            .default_id("org/model-a")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSettings(_)));

        let err = ModelSettings::builder()
            .model_ids(["org/model-a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSettings(_)));
    }

    #[test]
    fn test_from_map_rejects_generation_class() {
        let map = json!({
            "default_id": "a",
            "model_ids": ["a"],
            "generation_class": "Whatever",
        });
        let Value::Object(map) = map else { unreachable!() };
        assert!(matches!(
            ModelSettings::from_map("ModelAConfig", map),
            Err(ConfigError::ReservedSettingsKey { .. })
        ));
    }

    #[test]
    fn test_from_map_rejects_unknown_keys() {
        let Value::Object(map) = json!({"default_id": "a", "model_ids": ["a"], "colour": "red"})
        else {
            unreachable!()
        };
        assert!(matches!(
            ModelSettings::from_map("ModelAConfig", map),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_map_roundtrip_keeps_declared_keys_only() {
        let settings = ModelSettings {
            timeout: Some(3_600_000),
            ..declared()
        };
        let map = settings.to_map();
        assert_eq!(map.get("timeout"), Some(&json!(3_600_000)));
        assert!(!map.contains_key("url"));
        assert_eq!(ModelSettings::from_map("X", map).unwrap(), settings);
    }

    #[test]
    fn test_resolve_dasherize() {
        temp_env::with_vars(
            vec![("SDSERVER_MODEL_A_BETTERTRANSFORMER", None::<&str>)],
            || {
                let resolved = ResolvedSettings::resolve("ModelA", &declared()).unwrap();
                assert_eq!(resolved.model_name(), "model_a");
                assert_eq!(resolved.start_name(), "model-a");
                assert_eq!(resolved.service_name(), "generated_model_a_service.py");
                assert_eq!(resolved.generation_class(), "ModelAGenerationConfig");
                assert_eq!(*resolved.timeout(), DEFAULT_TIMEOUT_MS);
                assert_eq!(*resolved.workers_per_resource(), 1.0);
                assert_eq!(*resolved.name_type(), NameType::Dasherize);
                assert!(!*resolved.bettertransformer());
                assert_eq!(resolved.env().config(), "SDSERVER_MODEL_A_CONFIG");
            },
        );
    }

    #[test]
    fn test_resolve_lowercase() {
        let settings = ModelSettings {
            name_type: Some(NameType::Lowercase),
            ..declared()
        };
        let resolved = ResolvedSettings::resolve("FlanT5", &settings).unwrap();
        assert_eq!(resolved.model_name(), "flant5");
        assert_eq!(resolved.start_name(), "flant5");
    }

    #[test]
    fn test_bettertransformer_from_env_unless_gpu() {
        temp_env::with_vars(
            vec![("SDSERVER_BT_CHECK_BETTERTRANSFORMER", Some("true"))],
            || {
                let resolved = ResolvedSettings::resolve("BtCheck", &declared()).unwrap();
                assert!(*resolved.bettertransformer());

                let gpu = ModelSettings {
                    requires_gpu: Some(true),
                    ..declared()
                };
                let resolved = ResolvedSettings::resolve("BtCheck", &gpu).unwrap();
                assert!(!*resolved.bettertransformer());
            },
        );
    }

    #[test]
    fn test_enum_text() {
        assert_eq!(ModelType::Seq2seqLm.to_string(), "seq2seq_lm");
        assert_eq!("cpp".parse::<Runtime>().unwrap(), Runtime::Cpp);
        assert_eq!(
            serde_json::to_value(NameType::Lowercase).unwrap(),
            json!("lowercase")
        );
    }
}
