// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use serde_json::{json, Map, Value};

use sdserver::schema::RESERVED_NAMES;
use sdserver::{ConfigError, ConfigSchema, FieldSpec, FieldType, ModelSettings, NameType, SdConfig};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn model_a_settings() -> ModelSettings {
    ModelSettings::builder()
        .default_id("org/model-a")
        .model_ids(["org/model-a", "org/model-b"])
        .name_type(NameType::Dasherize)
        .build()
        .unwrap()
}

fn model_a() -> Arc<ConfigSchema> {
    ConfigSchema::declare("ModelAConfig")
        .settings(model_a_settings())
        .generation_default("temperature", 0.7)
        .build()
        .unwrap()
}

#[test]
fn test_declared_names() {
    let schema = model_a();
    let settings = schema.settings();
    assert_eq!(settings.model_name(), "model_a");
    assert_eq!(settings.start_name(), "model-a");
    assert_eq!(settings.service_name(), "generated_model_a_service.py");
    assert_eq!(settings.env().model_id(), "SDSERVER_MODEL_A_MODEL_ID");
    assert_eq!(
        schema.generation().field("temperature").unwrap().env(),
        "SDSERVER_MODEL_A_GENERATION_TEMPERATURE"
    );
}

#[test]
fn test_environment_temperature_overrides_declared_default() {
    temp_env::with_vars(
        vec![
            ("SDSERVER_MODEL_A_TEMPERATURE", Some("0.2")),
            ("SDSERVER_MODEL_A_GENERATION_TEMPERATURE", None),
        ],
        || {
            let schema = model_a();
            let config = SdConfig::construct_default(&schema).unwrap();
            assert_eq!(config.get("temperature").unwrap(), &json!(0.2));
        },
    );
    // declared after the variable is gone: back to the code default
    temp_env::with_vars(
        vec![
            ("SDSERVER_MODEL_A_TEMPERATURE", None::<&str>),
            ("SDSERVER_MODEL_A_GENERATION_TEMPERATURE", None),
        ],
        || {
            let config = SdConfig::construct_default(&model_a()).unwrap();
            assert_eq!(config.get("temperature").unwrap(), &json!(0.7));
        },
    );
}

#[test]
fn test_environment_is_baked_at_declaration() {
    let schema = temp_env::with_var("SDSERVER_BAKED_GENERATION_TOP_K", Some("3"), || {
        ConfigSchema::declare("BakedConfig")
            .settings(model_a_settings())
            .build()
            .unwrap()
    });
    temp_env::with_var("SDSERVER_BAKED_GENERATION_TOP_K", Some("9"), || {
        let config = SdConfig::construct_default(&schema).unwrap();
        assert_eq!(config.get("top_k").unwrap(), &json!(3));
    });
}

#[test]
fn test_unknown_keyword_goes_to_extras() {
    let schema = model_a();
    let config = SdConfig::construct(&schema, object(json!({"foo": "bar"})), None, None).unwrap();
    assert_eq!(config.extras(), &object(json!({"foo": "bar"})));
    assert_eq!(config.get("foo").unwrap(), &json!("bar"));
}

#[test]
fn test_declared_field_wins_over_extras() {
    let schema = ConfigSchema::declare("PriorityConfig")
        .settings(model_a_settings())
        .field(FieldSpec::new("steps").typed(FieldType::Int).default(4))
        .build()
        .unwrap();
    let config = SdConfig::construct(
        &schema,
        Map::new(),
        None,
        Some(object(json!({"steps": 100}))),
    )
    .unwrap();
    assert_eq!(config.get("steps").unwrap(), &json!(4));
}

#[test]
fn test_reserved_names_are_never_writable() {
    let schema = model_a();
    let mut config = SdConfig::construct(
        &schema,
        object(json!({"foo": 1, "top_k": 2})),
        None,
        None,
    )
    .unwrap();
    for name in RESERVED_NAMES {
        for value in [json!(null), json!(1), json!("x"), json!({"a": 1})] {
            assert!(matches!(
                config.try_set(name, value),
                Err(ConfigError::ForbiddenAttribute { .. })
            ));
        }
    }
}

#[test]
fn test_defaults_required_for_default_construction() {
    let schema = ConfigSchema::declare("NeedsSeedConfig")
        .settings(model_a_settings())
        .field(FieldSpec::new("seed").typed(FieldType::Int))
        .build()
        .unwrap();
    assert!(SdConfig::construct_default(&schema).is_err());

    let schema = temp_env::with_var("SDSERVER_HAS_SEED_SEED", Some("5"), || {
        ConfigSchema::declare("HasSeedConfig")
            .settings(model_a_settings())
            .field(FieldSpec::new("seed").typed(FieldType::Int))
            .build()
            .unwrap()
    });
    let config = SdConfig::construct_default(&schema).unwrap();
    assert_eq!(config.get("seed").unwrap(), &json!(5));
}

#[test]
fn test_structure_dump_roundtrip() {
    let schema = ConfigSchema::declare("RoundtripConfig")
        .settings(model_a_settings())
        .field(FieldSpec::new("scheduler").typed(FieldType::Str).default("ddim"))
        .field(FieldSpec::new("tags").typed(FieldType::StrList).default(json!(["a"])))
        .build()
        .unwrap();
    let config = SdConfig::construct(
        &schema,
        object(json!({"scheduler": "euler", "top_p": 0.5, "guidance_scale": 3.0, "x": true})),
        None,
        None,
    )
    .unwrap();
    for flatten in [false, true] {
        let dumped = Value::Object(config.model_dump(flatten));
        assert_eq!(SdConfig::structure(&schema, dumped).unwrap(), config);
    }
}

#[test]
fn test_derivate_without_overrides_keeps_settings() {
    let schema = model_a();
    let config = SdConfig::model_derivate(&schema, None, Map::new()).unwrap();
    assert_eq!(config.schema().declared_settings(), schema.declared_settings());
    assert_eq!(config.schema().name(), "ModelADerivateConfig");
}

#[test]
fn test_empty_ids_are_rejected() {
    let err = ModelSettings::builder()
        .default_id("")
        .model_ids(["org/model-a"])
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingSettings(_)));

    let err = ModelSettings::builder()
        .default_id("org/model-a")
        .model_ids(Vec::<String>::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingSettings(_)));
}
