// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

/// Result type for schema declaration and configuration access.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// `default_id` or `model_ids` missing/empty, or no settings block at all.
    #[error("{0}")]
    MissingSettings(String),

    #[error(
        "'{key}' shouldn't be defined in the settings of '{schema}', declare the generation \
         defaults on the schema instead"
    )]
    ReservedSettingsKey { schema: String, key: String },

    #[error("The following field doesn't have a type annotation: {0:?}")]
    MissingAnnotation(Vec<String>),

    #[error(
        "'{attr}' belongs to a reserved namespace of '{schema}' and should not be accessed nor \
         modified at runtime. Derive a new configuration instead"
    )]
    ForbiddenAttribute { schema: String, attr: String },

    #[error("Failed to decode environment variable '{var}': {reason}")]
    EnvDecode { var: String, reason: String },

    #[error("Invalid value for field '{field}': expected {expected}, got {value}")]
    InvalidValue {
        field: String,
        expected: String,
        value: serde_json::Value,
    },

    #[error("Missing value for field '{field}' of '{schema}' (no default and no environment override)")]
    MissingValue { schema: String, field: String },

    #[error("Could not find key '{0}'")]
    KeyNotFound(String),

    #[error("'{schema}' has no field named '{field}'")]
    UnknownField { schema: String, field: String },

    #[error("Expected a mapping, but got {0}")]
    NotAMapping(String),

    #[error("{0}")]
    MissingBackend(String),

    #[error("Invalid field type '{0}'")]
    InvalidFieldType(String),

    #[error("Error decoding JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error loading declaration: {0}")]
    Declaration(#[from] figment::Error),
}

/// Name of the JSON type of `value`, used in mapping errors.
pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
