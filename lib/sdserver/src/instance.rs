// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration instances.
//!
//! An [`SdConfig`] holds the values of one [`ConfigSchema`]: declared fields, the generation
//! sub-record and an open extras map for keys the schema does not know about.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::env::read_var;
use crate::error::{kind_of, ConfigError, Result};
use crate::generation::GenerationConfig;
use crate::schema::{ConfigSchema, GENERATION_CONFIG_KEY, RESERVED_NAMES};
use crate::settings::{ModelSettings, ResolvedSettings, GENERATION_CLASS};

type Lookup = for<'a> fn(&'a SdConfig, &str) -> Option<&'a Value>;

/// Lookup tiers of [`SdConfig::get`], in priority order.
const LOOKUP_CHAIN: [Lookup; 4] = [from_settings, from_fields, from_generation, from_extras];

fn from_settings<'a>(config: &'a SdConfig, key: &str) -> Option<&'a Value> {
    config.schema.settings_map().get(key)
}

fn from_fields<'a>(config: &'a SdConfig, key: &str) -> Option<&'a Value> {
    config.values.get(key)
}

fn from_generation<'a>(config: &'a SdConfig, key: &str) -> Option<&'a Value> {
    config.generation_config.get(key)
}

fn from_extras<'a>(config: &'a SdConfig, key: &str) -> Option<&'a Value> {
    config.extras.get(key)
}

#[derive(Debug, Clone)]
pub struct SdConfig {
    schema: Arc<ConfigSchema>,
    values: Map<String, Value>,
    generation_config: GenerationConfig,
    extras: Map<String, Value>,
}

impl SdConfig {
    /// Build an instance of `schema`.
    ///
    /// Keys of `attrs` naming a generation field are merged into `generation_config`,
    /// overriding same-named entries there, even when a declared field shares the name.
    /// Remaining keys feed the declared fields, and keys matching neither end up in the
    /// extras map. Explicit `extras` entries shadowing a declared or generation field are
    /// dropped. Declared fields not given take their baked default.
    pub fn construct(
        schema: &Arc<ConfigSchema>,
        mut attrs: Map<String, Value>,
        generation_config: Option<Map<String, Value>>,
        extras: Option<Map<String, Value>>,
    ) -> Result<Self> {
        let mut generation_input = generation_config.unwrap_or_default();
        if let Some(nested) = attrs.remove(GENERATION_CONFIG_KEY) {
            generation_input.extend(nested_generation(schema, nested)?);
        }

        let mut extras = unshadowed_extras(schema, extras.unwrap_or_default());
        let mut given = Map::new();
        for (key, value) in attrs {
            if schema.generation().contains(&key) {
                generation_input.insert(key, value);
            } else if schema.accepted_keys().contains(&key) {
                given.insert(key, value);
            } else if !value.is_null() {
                extras.insert(key, value);
            }
        }

        Self::assemble(schema, given, generation_input, extras)
    }

    fn assemble(
        schema: &Arc<ConfigSchema>,
        mut given: Map<String, Value>,
        generation_input: Map<String, Value>,
        extras: Map<String, Value>,
    ) -> Result<Self> {
        let mut values = Map::new();
        for field in schema.fields() {
            let value = match given.remove(field.name()) {
                Some(Value::Null) if field.field_type().coerce(&Value::Null).is_none() => None,
                other => other,
            };
            let value = match value {
                Some(v) => field.accept(&v)?,
                None => field
                    .default_value()
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingValue {
                        schema: schema.name().to_string(),
                        field: field.name().to_string(),
                    })?,
            };
            values.insert(field.name().to_string(), value);
        }

        let generation_config = schema.generation().instantiate(generation_input)?;

        tracing::debug!(
            schema = %schema.name(),
            fields = ?values.keys().collect::<Vec<_>>(),
            extras = ?extras.keys().collect::<Vec<_>>(),
            "creating configuration"
        );

        Ok(SdConfig {
            schema: schema.clone(),
            values,
            generation_config,
            extras,
        })
    }

    /// An instance with every value at its default.
    pub fn construct_default(schema: &Arc<ConfigSchema>) -> Result<Self> {
        Self::construct(schema, Map::new(), None, None)
    }

    /// Build an instance from a dumped mapping, flattened or not.
    ///
    /// A nested `generation_config` object feeds the generation sub-record; keys the schema
    /// does not know about are kept as extras. When the mapping is nested, a top-level key
    /// shared by a declared field and a generation field is the declared field's value;
    /// in a flattened mapping it belongs to the generation sub-record.
    pub fn structure(schema: &Arc<ConfigSchema>, data: Value) -> Result<Self> {
        let Value::Object(mut data) = data else {
            return Err(ConfigError::NotAMapping(format!(
                "cannot structure '{}' from {}",
                schema.name(),
                kind_of(&data)
            )));
        };

        let nested = data.remove(GENERATION_CONFIG_KEY);
        let is_nested = nested.is_some();
        let mut generation = match nested {
            Some(value) => nested_generation(schema, value)?,
            None => Map::new(),
        };

        let mut given = Map::new();
        let mut extras = Map::new();
        for (key, value) in data {
            let declared = schema.accepted_keys().contains(&key);
            if declared && (is_nested || !schema.generation().contains(&key)) {
                given.insert(key, value);
            } else if schema.generation().contains(&key) {
                generation.insert(key, value);
            } else {
                extras.insert(key, value);
            }
        }
        Self::assemble(schema, given, generation, extras)
    }

    /// Build an instance from the model's `CONFIG` environment variable, then apply
    /// `overrides`.
    ///
    /// The variable holds a JSON blob in the [`SdConfig::model_dump`] shape. Null overrides
    /// are ignored. An explicit `generation_config` override wins over same-named scalar
    /// overrides.
    pub fn model_construct_env(
        schema: &Arc<ConfigSchema>,
        overrides: Map<String, Value>,
    ) -> Result<Self> {
        let var = schema.env().config();
        let mut data = match read_var(var) {
            Some(raw) => {
                let blob: Value =
                    serde_json::from_str(&raw).map_err(|e| ConfigError::EnvDecode {
                        var: var.to_string(),
                        reason: format!("failed to parse as a JSON string: {e}"),
                    })?;
                match blob {
                    Value::Object(map) => map,
                    other => {
                        return Err(ConfigError::NotAMapping(format!(
                            "'{var}' holds {}",
                            kind_of(&other)
                        )))
                    }
                }
            }
            None => Map::new(),
        };

        let mut overrides: Map<String, Value> = overrides
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect();

        match overrides.remove(GENERATION_CONFIG_KEY) {
            Some(Value::Object(explicit)) => {
                let shadowed =
                    |k: &String| !schema.accepted_keys().contains(k) && explicit.contains_key(k);
                overrides.retain(|k, _| !shadowed(k));
                data.retain(|k, _| !shadowed(k));

                let mut generation = match data.remove(GENERATION_CONFIG_KEY) {
                    Some(Value::Object(map)) => map,
                    Some(Value::Null) | None => Map::new(),
                    Some(other) => {
                        return Err(ConfigError::NotAMapping(format!(
                            "{GENERATION_CONFIG_KEY} in '{var}' must be a mapping, got {}",
                            kind_of(&other)
                        )))
                    }
                };
                generation.extend(explicit);
                data.insert(GENERATION_CONFIG_KEY.to_string(), Value::Object(generation));
            }
            Some(other) => {
                return Err(ConfigError::NotAMapping(format!(
                    "expected a mapping for {GENERATION_CONFIG_KEY}, got {}",
                    kind_of(&other)
                )))
            }
            None => {}
        }
        data.extend(overrides);

        Self::structure(schema, Value::Object(data))
    }

    /// Declare a subtype of this instance's schema and build an instance of it.
    ///
    /// Settings keys in `overrides` are deep-merged into the new schema's settings; the rest
    /// are construction values.
    pub fn model_derivate(
        schema: &Arc<ConfigSchema>,
        name: Option<&str>,
        overrides: Map<String, Value>,
    ) -> Result<Self> {
        let mut settings = Map::new();
        let mut attrs = Map::new();
        for (key, value) in overrides {
            if ModelSettings::FIELDS.contains(&key.as_str()) || key == GENERATION_CLASS {
                settings.insert(key, value);
            } else if ResolvedSettings::DERIVED.contains(&key.as_str()) {
                tracing::warn!(key = %key, "'{key}' is derived from the schema name and cannot be overridden, ignoring");
            } else {
                attrs.insert(key, value);
            }
        }
        let derived = schema.derivate(name, settings)?;
        Self::construct(&derived, attrs, None, None)
    }

    /// Split command-line keyword arguments into an instance and the unrelated leftovers.
    ///
    /// Same as [`SdConfig::from_cli`] on this instance's schema.
    pub fn model_validate_cli(
        &self,
        kwargs: Map<String, Value>,
    ) -> Result<(SdConfig, Map<String, Value>)> {
        Self::from_cli(&self.schema, kwargs)
    }

    /// Split command-line keyword arguments into an instance of `schema` and the unrelated
    /// leftovers.
    ///
    /// `<model>_generation_<field>` keys feed the generation sub-record and `<model>_<field>`
    /// keys the top-level fields; null values are treated as not given. The instance is
    /// built with [`SdConfig::model_construct_env`].
    pub fn from_cli(
        schema: &Arc<ConfigSchema>,
        kwargs: Map<String, Value>,
    ) -> Result<(SdConfig, Map<String, Value>)> {
        let model_name = schema.model_name();
        let generation_prefix = format!("{model_name}_generation_");
        let prefix = format!("{model_name}_");

        let mut attrs = Map::new();
        let mut generation = Map::new();
        let mut rest = Map::new();
        for (key, value) in kwargs {
            if let Some(name) = key.strip_prefix(&generation_prefix) {
                if !value.is_null() {
                    generation.insert(name.to_string(), value);
                }
            } else if let Some(name) = key.strip_prefix(&prefix) {
                attrs.insert(name.to_string(), value);
            } else {
                rest.insert(key, value);
            }
        }
        attrs.insert(GENERATION_CONFIG_KEY.to_string(), Value::Object(generation));

        Ok((Self::model_construct_env(schema, attrs)?, rest))
    }

    /// Keyed read: settings, then declared fields, then generation parameters, then extras.
    pub fn get(&self, key: &str) -> Result<&Value> {
        check_reserved(&self.schema, key)?;
        LOOKUP_CHAIN
            .iter()
            .find_map(|lookup| lookup(self, key))
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Value of a declared field.
    pub fn field(&self, key: &str) -> Result<&Value> {
        check_reserved(&self.schema, key)?;
        self.values
            .get(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Assign a declared field. Settings-derived and reserved names are fixed per schema.
    pub fn try_set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        check_reserved(&self.schema, key)?;
        if key == GENERATION_CONFIG_KEY
            || key == GENERATION_CLASS
            || self.schema.settings_map().contains_key(key)
        {
            return Err(ConfigError::ForbiddenAttribute {
                schema: self.schema.name().to_string(),
                attr: key.to_string(),
            });
        }
        let field = self
            .schema
            .field(key)
            .ok_or_else(|| ConfigError::UnknownField {
                schema: self.schema.name().to_string(),
                field: key.to_string(),
            })?;
        let value = field.accept(&value.into())?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn schema(&self) -> &Arc<ConfigSchema> {
        &self.schema
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    pub fn extras(&self) -> &Map<String, Value> {
        &self.extras
    }

    /// Declared field values.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Serialize to a mapping: extras, declared fields, and the generation sub-record under
    /// `generation_config`. With `flatten` the generation fields are inlined instead and win
    /// any name collision.
    pub fn model_dump(&self, flatten: bool) -> Map<String, Value> {
        let mut dumped = self.extras.clone();
        dumped.extend(self.values.clone());
        if flatten {
            dumped.extend(self.generation_config.to_map());
        } else {
            dumped.insert(
                GENERATION_CONFIG_KEY.to_string(),
                Value::Object(self.generation_config.to_map()),
            );
        }
        dumped
    }

    pub fn model_dump_json(&self, flatten: bool) -> Result<String> {
        Ok(serde_json::to_string(&self.model_dump(flatten))?)
    }

    /// Flat map of sampling parameters for the inference engine.
    pub fn to_generation_config(&self) -> Map<String, Value> {
        self.generation_config.to_map()
    }
}

impl PartialEq for SdConfig {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.values == other.values
            && self.generation_config == other.generation_config
            && self.extras == other.extras
    }
}

/// The generation mapping nested under `generation_config`; null counts as empty.
fn nested_generation(schema: &ConfigSchema, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ConfigError::NotAMapping(format!(
            "{GENERATION_CONFIG_KEY} of '{}' must be a mapping, got {}",
            schema.name(),
            kind_of(&other)
        ))),
    }
}

/// Extras entries a lookup could never reach, and that a dump would not round-trip, are
/// dropped.
fn unshadowed_extras(schema: &ConfigSchema, mut extras: Map<String, Value>) -> Map<String, Value> {
    extras.retain(|key, _| {
        let shadowed = key == GENERATION_CONFIG_KEY
            || schema.accepted_keys().contains(key)
            || schema.generation().contains(key);
        if shadowed {
            tracing::debug!(key = %key, schema = %schema.name(), "dropping extra shadowed by a field");
        }
        !shadowed
    });
    extras
}

fn check_reserved(schema: &ConfigSchema, key: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&key) {
        return Err(ConfigError::ForbiddenAttribute {
            schema: schema.name().to_string(),
            attr: key.to_string(),
        });
    }
    Ok(())
}
