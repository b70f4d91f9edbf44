// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Field declarations and their value types.
//!
//! A [`FieldSpec`] is what a schema author writes; a [`Field`] is the resolved form with its
//! environment binding and the default captured at declaration time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::env::{field_env_key, read_var};
use crate::error::{ConfigError, Result};

/// Value type of a configuration field.
///
/// The textual form (`int`, `optional[str]`, `int | float`, ...) is what declaration files use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    StrList,
    Json,
    Optional(Box<FieldType>),
    Union(Vec<FieldType>),
}

impl FieldType {
    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    /// Union-typed fields (including optional ones) have no command-line flag.
    pub fn is_union(&self) -> bool {
        matches!(self, FieldType::Optional(_) | FieldType::Union(_))
    }

    /// Validate `value` against this type, normalising numbers and parsing strings.
    ///
    /// Returns `None` on mismatch.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (FieldType::Json, _) => Some(value.clone()),
            (FieldType::Optional(_), Value::Null) => Some(Value::Null),
            (FieldType::Optional(inner), _) => inner.coerce(value),
            (FieldType::Union(members), _) => members.iter().find_map(|m| m.coerce(value)),
            (FieldType::Bool, Value::Bool(_)) => Some(value.clone()),
            (FieldType::Int, Value::Number(n)) => n.as_i64().map(Value::from).or_else(|| {
                // integral floats only, and never past the i64 range
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .filter(|f| (i64::MIN as f64..i64::MAX as f64).contains(f))
                    .map(|f| Value::from(f as i64))
            }),
            (FieldType::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (FieldType::Str, Value::String(_)) => Some(value.clone()),
            (FieldType::StrList, Value::Array(items)) if items.iter().all(Value::is_string) => {
                Some(value.clone())
            }
            (_, Value::String(raw)) => self.parse_str(raw).ok(),
            _ => None,
        }
    }

    /// Parse environment or command-line text into a value of this type.
    pub fn parse_str(&self, raw: &str) -> std::result::Result<Value, String> {
        let trimmed = raw.trim();
        match self {
            FieldType::Bool => sdserver_config::parse_bool(trimmed)
                .map(Value::Bool)
                .map_err(|e| e.to_string()),
            FieldType::Int => trimmed
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("'{raw}' as int: {e}")),
            FieldType::Float => match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Value::from(f)),
                Ok(_) => Err(format!("'{raw}' as float: not a finite number")),
                Err(e) => Err(format!("'{raw}' as float: {e}")),
            },
            FieldType::Str => Ok(Value::String(raw.to_string())),
            FieldType::StrList if trimmed.starts_with('[') => {
                serde_json::from_str::<Vec<String>>(trimmed)
                    .map(|items| Value::from(items))
                    .map_err(|e| format!("'{raw}' as list[str]: {e}"))
            }
            FieldType::StrList => Ok(Value::from(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>(),
            )),
            FieldType::Json => {
                serde_json::from_str(trimmed).map_err(|e| format!("'{raw}' as json: {e}"))
            }
            FieldType::Optional(inner) => {
                if trimmed.is_empty()
                    || trimmed.eq_ignore_ascii_case("none")
                    || trimmed.eq_ignore_ascii_case("null")
                {
                    Ok(Value::Null)
                } else {
                    inner.parse_str(raw)
                }
            }
            FieldType::Union(members) => members
                .iter()
                .find_map(|m| m.parse_str(raw).ok())
                .ok_or_else(|| format!("'{raw}' as {self}")),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => write!(f, "bool"),
            FieldType::Int => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
            FieldType::Str => write!(f, "str"),
            FieldType::StrList => write!(f, "list[str]"),
            FieldType::Json => write!(f, "json"),
            FieldType::Optional(inner) => write!(f, "optional[{inner}]"),
            FieldType::Union(members) => {
                let parts: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" | "))
            }
        }
    }
}

impl FromStr for FieldType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let members = split_top_level(s);
        if members.len() > 1 {
            let mut nullable = false;
            let mut types = Vec::new();
            for member in members {
                if matches!(member.to_lowercase().as_str(), "none" | "null") {
                    nullable = true;
                } else {
                    types.push(member.parse()?);
                }
            }
            let inner = match types.len() {
                0 => return Err(ConfigError::InvalidFieldType(s.to_string())),
                1 => types.remove(0),
                _ => FieldType::Union(types),
            };
            return Ok(if nullable { FieldType::optional(inner) } else { inner });
        }

        let lower = s.to_lowercase();
        if let Some(inner) = lower
            .strip_prefix("optional[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return Ok(FieldType::optional(inner.parse()?));
        }
        match lower.as_str() {
            "bool" | "boolean" => Ok(FieldType::Bool),
            "int" | "integer" => Ok(FieldType::Int),
            "float" | "number" => Ok(FieldType::Float),
            "str" | "string" => Ok(FieldType::Str),
            "list[str]" | "list" => Ok(FieldType::StrList),
            "json" | "dict" | "any" => Ok(FieldType::Json),
            _ => Err(ConfigError::InvalidFieldType(s.to_string())),
        }
    }
}

/// Split on `|` outside of brackets.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '|' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

impl TryFrom<String> for FieldType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// A field as declared by a schema author.
///
/// `field_type` is optional so that declarations coming from files can be checked for a
/// missing type annotation; building a schema fails if any field lacks one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,

    /// Code-declared default. `Some(Value::Null)` is an explicit `None` default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Pinned environment variable; derived from the model name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            field_type: None,
            default: None,
            env: None,
            description: None,
        }
    }

    pub fn typed(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A resolved field: typed, bound to its environment variable, default baked in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    default: Option<Value>,
    env: String,
    description: String,
    #[serde(skip)]
    spec: FieldSpec,
}

impl Field {
    /// Resolve `spec` for `model_name`.
    ///
    /// `default` is the code-level default to use (the declared one, or an author override);
    /// the first set variable among the bound name and `fallback_env` replaces it. The
    /// environment is read here, once.
    pub(crate) fn resolve(
        spec: &FieldSpec,
        model_name: &str,
        suffix: Option<&str>,
        default: Option<&Value>,
        fallback_env: Option<String>,
    ) -> Result<Field> {
        let field_type = spec
            .field_type
            .clone()
            .ok_or_else(|| ConfigError::MissingAnnotation(vec![spec.name.clone()]))?;
        let env = spec
            .env
            .clone()
            .unwrap_or_else(|| field_env_key(model_name, &spec.name, suffix));

        let mut baked = match default {
            Some(value) => Some(field_type.coerce(value).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: spec.name.clone(),
                    expected: field_type.to_string(),
                    value: value.clone(),
                }
            })?),
            None => None,
        };

        for var in std::iter::once(&env).chain(fallback_env.iter()) {
            if let Some(raw) = read_var(var) {
                let value = field_type
                    .parse_str(&raw)
                    .map_err(|reason| ConfigError::EnvDecode {
                        var: var.clone(),
                        reason,
                    })?;
                tracing::debug!(field = %spec.name, env = %var, "default overridden from environment");
                baked = Some(value);
                break;
            }
        }

        // nullable fields default to null
        if baked.is_none() && matches!(field_type, FieldType::Optional(_)) {
            baked = Some(Value::Null);
        }

        Ok(Field {
            name: spec.name.clone(),
            description: spec
                .description
                .clone()
                .unwrap_or_else(|| "(not provided)".to_string()),
            field_type,
            default: baked,
            env,
            spec: spec.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Default captured at declaration time, environment override included.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The declaration this field was resolved from.
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Coerce `value` for this field, failing with [`ConfigError::InvalidValue`].
    pub(crate) fn accept(&self, value: &Value) -> Result<Value> {
        self.field_type
            .coerce(value)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                value: value.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("bool", FieldType::Bool)]
    #[case("int", FieldType::Int)]
    #[case("list[str]", FieldType::StrList)]
    #[case("optional[int]", FieldType::optional(FieldType::Int))]
    #[case("int | None", FieldType::optional(FieldType::Int))]
    #[case("int | float", FieldType::Union(vec![FieldType::Int, FieldType::Float]))]
    #[case("optional[int | float]", FieldType::optional(FieldType::Union(vec![FieldType::Int, FieldType::Float])))]
    fn test_parse_field_type(#[case] text: &str, #[case] expected: FieldType) {
        assert_eq!(text.parse::<FieldType>().unwrap(), expected);
        // Display output parses back to the same type
        assert_eq!(expected.to_string().parse::<FieldType>().unwrap(), expected);
    }

    #[test]
    fn test_invalid_field_type() {
        assert!(matches!(
            "tensor".parse::<FieldType>(),
            Err(ConfigError::InvalidFieldType(_))
        ));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(FieldType::Float.coerce(&json!(2)), Some(json!(2.0)));
        assert_eq!(FieldType::Int.coerce(&json!(3.0)), Some(json!(3)));
        assert_eq!(FieldType::Int.coerce(&json!(3.5)), None);
        assert_eq!(FieldType::Int.coerce(&json!(-4096.0)), Some(json!(-4096)));
        assert_eq!(FieldType::Int.coerce(&json!(u64::MAX)), None);
        assert_eq!(FieldType::Int.coerce(&json!(1e30)), None);
        assert_eq!(FieldType::Int.coerce(&json!(9.3e18)), None);
        assert_eq!(FieldType::Bool.coerce(&json!("on")), Some(json!(true)));
        assert_eq!(FieldType::Str.coerce(&json!(1)), None);
        assert_eq!(FieldType::Int.coerce(&Value::Null), None);
        assert_eq!(
            FieldType::optional(FieldType::Int).coerce(&Value::Null),
            Some(Value::Null)
        );
        assert_eq!(
            FieldType::Union(vec![FieldType::Int, FieldType::Str]).coerce(&json!("x")),
            Some(json!("x"))
        );
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(FieldType::Bool.parse_str("YES"), Ok(json!(true)));
        assert_eq!(FieldType::Float.parse_str("0.2"), Ok(json!(0.2)));
        assert_eq!(
            FieldType::StrList.parse_str("a, b,c"),
            Ok(json!(["a", "b", "c"]))
        );
        assert_eq!(
            FieldType::StrList.parse_str("[\"a\",\"b\"]"),
            Ok(json!(["a", "b"]))
        );
        assert_eq!(
            FieldType::optional(FieldType::Int).parse_str("none"),
            Ok(Value::Null)
        );
        assert!(FieldType::Int.parse_str("abc").is_err());
        assert!(FieldType::Float.parse_str("inf").is_err());
    }

    #[test]
    fn test_field_spec_from_toml_shape() {
        let spec: FieldSpec = serde_json::from_value(json!({
            "name": "steps",
            "type": "int",
            "default": 30,
        }))
        .unwrap();
        assert_eq!(spec.field_type, Some(FieldType::Int));
        assert_eq!(spec.default, Some(json!(30)));
    }

    #[test]
    fn test_resolve_bakes_environment() {
        let spec = FieldSpec::new("steps").typed(FieldType::Int).default(30);
        temp_env::with_vars(
            vec![("SDSERVER_FIELD_CHECK_STEPS", Some("12"))],
            || {
                let field = Field::resolve(&spec, "field_check", None, spec.default.as_ref(), None)
                    .unwrap();
                assert_eq!(field.env(), "SDSERVER_FIELD_CHECK_STEPS");
                assert_eq!(field.default_value(), Some(&json!(12)));
            },
        );
        // unset again, the previously resolved field keeps its baked default
        let field = Field::resolve(&spec, "field_check", None, spec.default.as_ref(), None).unwrap();
        assert_eq!(field.default_value(), Some(&json!(30)));
    }

    #[test]
    fn test_resolve_env_decode_error() {
        let spec = FieldSpec::new("steps").typed(FieldType::Int);
        temp_env::with_vars(
            vec![("SDSERVER_FIELD_BAD_STEPS", Some("many"))],
            || {
                let err = Field::resolve(&spec, "field_bad", None, None, None).unwrap_err();
                match err {
                    ConfigError::EnvDecode { var, .. } => {
                        assert_eq!(var, "SDSERVER_FIELD_BAD_STEPS")
                    }
                    other => panic!("unexpected error {other:?}"),
                }
            },
        );
    }

    #[test]
    fn test_resolve_rejects_bad_default() {
        let spec = FieldSpec::new("steps").typed(FieldType::Int).default("lots");
        assert!(matches!(
            Field::resolve(&spec, "field_default", None, spec.default.as_ref(), None),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
