// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Schema declaration.
//!
//! A [`ConfigSchema`] is declared once per model family, either in code through
//! [`ConfigSchema::declare`] or from a TOML/JSON [`ConfigDeclaration`]. Declaring resolves the
//! settings block, binds every field to its environment variable and bakes the
//! environment-derived defaults. The result is immutable and shared behind an [`Arc`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use figment::{
    providers::{Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::env::ModelEnv;
use crate::error::{ConfigError, Result};
use crate::field::{Field, FieldSpec, FieldType};
use crate::generation::GenerationSchema;
use crate::settings::{ModelSettings, ResolvedSettings};

/// Every schema name ends with this.
pub const CONFIG_SUFFIX: &str = "Config";

/// Name of the generation sub-record in dumps and constructor input.
pub const GENERATION_CONFIG_KEY: &str = "generation_config";

/// Names that are never readable or writable on an instance.
pub const RESERVED_NAMES: &[&str] = &["__config__", "GenerationConfig"];

/// A declared model configuration type.
#[derive(Debug, Clone)]
pub struct ConfigSchema {
    name: String,
    declared_settings: ModelSettings,
    settings: ResolvedSettings,
    settings_map: Map<String, Value>,
    field_specs: Vec<FieldSpec>,
    fields: Vec<Field>,
    generation: GenerationSchema,
    accepted_keys: BTreeSet<String>,
    hints: BTreeMap<String, FieldType>,
}

impl ConfigSchema {
    /// Start declaring a schema named `name` (e.g. `FlanT5Config`).
    pub fn declare(name: impl Into<String>) -> ConfigSchemaBuilder {
        ConfigSchemaBuilder {
            name: name.into(),
            settings: None,
            fields: Vec::new(),
            generation_defaults: Map::new(),
            generation_fields: Vec::new(),
            parent: None,
        }
    }

    /// Declare a schema from a parsed declaration file.
    pub fn from_declaration(declaration: ConfigDeclaration) -> Result<Arc<ConfigSchema>> {
        let mut builder = ConfigSchema::declare(declaration.name.clone());
        if let Some(parent) = &declaration.extends {
            builder = builder.extends(&crate::models::by_name(parent)?);
        }
        if let Some(settings) = declaration.settings {
            builder = builder.settings(ModelSettings::from_map(&declaration.name, settings)?);
        }
        for field in declaration.fields {
            builder = builder.field(field);
        }
        for (name, value) in declaration.generation {
            builder = builder.generation_default(name, value);
        }
        for field in declaration.generation_fields {
            builder = builder.generation_field(field);
        }
        builder.build()
    }

    /// A subtype of this schema with `overrides` deep-merged into its settings.
    ///
    /// The new schema inherits every field and generation default; its name defaults to
    /// `<Stem>DerivateConfig`.
    pub fn derivate(
        self: &Arc<Self>,
        name: Option<&str>,
        overrides: Map<String, Value>,
    ) -> Result<Arc<ConfigSchema>> {
        let name = name
            .map(String::from)
            .unwrap_or_else(|| format!("{}Derivate{CONFIG_SUFFIX}", self.stem()));
        let mut merged = Value::Object(self.declared_settings.to_map());
        deep_merge(&mut merged, Value::Object(overrides));
        let Value::Object(merged) = merged else {
            return Err(ConfigError::NotAMapping(name));
        };
        let settings = ModelSettings::from_map(&name, merged)?;
        ConfigSchema::declare(name)
            .extends(self)
            .settings(settings)
            .build()
    }

    /// Schema name, always ending in `Config`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name without its `Config` suffix.
    pub fn stem(&self) -> &str {
        self.name
            .strip_suffix(CONFIG_SUFFIX)
            .unwrap_or(self.name.as_str())
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    /// The resolved settings as a JSON map, the first lookup tier of an instance.
    pub fn settings_map(&self) -> &Map<String, Value> {
        &self.settings_map
    }

    /// The settings block as declared, before defaults were applied.
    pub fn declared_settings(&self) -> &ModelSettings {
        &self.declared_settings
    }

    /// Declared fields, inherited ones first.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_specs(&self) -> &[FieldSpec] {
        &self.field_specs
    }

    pub fn generation(&self) -> &GenerationSchema {
        &self.generation
    }

    /// Names of the declared top-level fields.
    pub fn accepted_keys(&self) -> &BTreeSet<String> {
        &self.accepted_keys
    }

    /// Field types by name, generation fields included.
    pub fn hints(&self) -> &BTreeMap<String, FieldType> {
        &self.hints
    }

    pub fn env(&self) -> &ModelEnv {
        self.settings.env()
    }

    pub fn model_name(&self) -> &str {
        self.settings.model_name()
    }
}

/// Builder for [`ConfigSchema`].
#[derive(Debug, Clone)]
pub struct ConfigSchemaBuilder {
    name: String,
    settings: Option<ModelSettings>,
    fields: Vec<FieldSpec>,
    generation_defaults: Map<String, Value>,
    generation_fields: Vec<FieldSpec>,
    parent: Option<Arc<ConfigSchema>>,
}

impl ConfigSchemaBuilder {
    pub fn settings(mut self, settings: ModelSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Declare a top-level field. Redeclaring a name replaces the earlier declaration.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        match self.fields.iter_mut().find(|f| f.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.fields.push(spec),
        }
        self
    }

    /// Override the default of a generation field.
    pub fn generation_default(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.generation_defaults.insert(name.into(), value.into());
        self
    }

    /// Declare an additional generation field, or replace a library one.
    pub fn generation_field(mut self, spec: FieldSpec) -> Self {
        match self.generation_fields.iter_mut().find(|f| f.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.generation_fields.push(spec),
        }
        self
    }

    /// Inherit fields, generation defaults and, unless given, settings from `parent`.
    pub fn extends(mut self, parent: &Arc<ConfigSchema>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn build(self) -> Result<Arc<ConfigSchema>> {
        let name = if self.name.ends_with(CONFIG_SUFFIX) {
            self.name
        } else {
            tracing::warn!(
                "configuration schema names should end with '{CONFIG_SUFFIX}'. Renaming '{}' to '{}{CONFIG_SUFFIX}'",
                self.name,
                self.name
            );
            format!("{}{CONFIG_SUFFIX}", self.name)
        };
        let stem = name.strip_suffix(CONFIG_SUFFIX).unwrap_or(&name).to_string();

        let declared_settings = match (self.settings, &self.parent) {
            (Some(settings), _) => settings,
            (None, Some(parent)) => parent.declared_settings.clone(),
            (None, None) => {
                return Err(ConfigError::MissingSettings(format!(
                    "'{name}' does not declare a settings block"
                )))
            }
        };
        let settings = ResolvedSettings::resolve(&stem, &declared_settings)?;
        let model_name = settings.model_name().to_string();

        let untyped: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.field_type.is_none())
            .map(|f| f.name.clone())
            .collect();
        if !untyped.is_empty() {
            return Err(ConfigError::MissingAnnotation(untyped));
        }
        if let Some(reserved) = self.fields.iter().find(|f| is_reserved_field_name(&f.name)) {
            return Err(ConfigError::ForbiddenAttribute {
                schema: name,
                attr: reserved.name.clone(),
            });
        }

        // inherited first, minus anything this schema redeclares
        let mut field_specs: Vec<FieldSpec> = self
            .parent
            .iter()
            .flat_map(|p| p.field_specs.iter())
            .filter(|inherited| !self.fields.iter().any(|own| own.name == inherited.name))
            .cloned()
            .collect();
        field_specs.extend(self.fields);

        let fields = field_specs
            .iter()
            .map(|spec| Field::resolve(spec, &model_name, None, spec.default.as_ref(), None))
            .collect::<Result<Vec<_>>>()?;

        let (mut generation_defaults, mut generation_fields) = match &self.parent {
            Some(parent) => (
                parent.generation.declared_defaults().clone(),
                parent.generation.declared_fields().to_vec(),
            ),
            None => (Map::new(), Vec::new()),
        };
        generation_defaults.extend(self.generation_defaults);
        for spec in self.generation_fields {
            generation_fields.retain(|f| f.name != spec.name);
            generation_fields.push(spec);
        }
        let top_level: HashSet<&str> = fields.iter().map(Field::name).collect();
        let generation = GenerationSchema::resolve(
            settings.generation_class(),
            &model_name,
            generation_defaults,
            generation_fields,
            &top_level,
        )?;

        let accepted_keys = fields.iter().map(|f| f.name().to_string()).collect();
        let hints = fields
            .iter()
            .chain(generation.fields())
            .map(|f| (f.name().to_string(), f.field_type().clone()))
            .collect();

        tracing::debug!(
            schema = %name,
            model_name = %model_name,
            fields = fields.len(),
            "declared configuration schema"
        );

        Ok(Arc::new(ConfigSchema {
            settings_map: settings.to_map(),
            name,
            declared_settings,
            settings,
            field_specs,
            fields,
            generation,
            accepted_keys,
            hints,
        }))
    }
}

fn is_reserved_field_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
        || name == GENERATION_CONFIG_KEY
        || ModelSettings::FIELDS.contains(&name)
        || ResolvedSettings::DERIVED.contains(&name)
}

/// Merge `overlay` into `base`; nested objects merge key by key, anything else is replaced.
pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// A schema declaration as written in a TOML or JSON file.
///
/// ```toml
/// name = "TinyDiffusionConfig"
/// extends = "stable-diffusion"
///
/// [settings]
/// default_id = "org/tiny-diffusion"
/// model_ids = ["org/tiny-diffusion"]
///
/// [[fields]]
/// name = "scheduler"
/// type = "str"
/// default = "ddim"
///
/// [generation]
/// num_inference_steps = 25
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDeclaration {
    pub name: String,

    /// Built-in model (start or model name) to extend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Raw settings block; required unless `extends` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,

    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Generation default overrides by field name.
    #[serde(default)]
    pub generation: Map<String, Value>,

    #[serde(default)]
    pub generation_fields: Vec<FieldSpec>,
}

impl ConfigDeclaration {
    /// Load a declaration; `.json` files are read as JSON, anything else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Figment::new().merge(Json::file(path)),
            _ => Figment::new().merge(Toml::file(path)),
        };
        Ok(figment.extract()?)
    }
}
