// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Command-line surface generated from a schema.
//!
//! Generation fields become `--<model>-generation-<field>` flags, top-level fields
//! `--<model>-<field>`. Argument ids use underscores so that [`matches_to_kwargs`] output can
//! be fed straight into [`crate::SdConfig::model_validate_cli`].

use clap::builder::BoolishValueParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Value};

use crate::field::{Field, FieldType};
use crate::naming;
use crate::schema::ConfigSchema;

fn generation_id(model_name: &str, field: &str) -> String {
    format!("{model_name}_generation_{field}")
}

fn field_id(model_name: &str, field: &str) -> String {
    format!("{model_name}_{field}")
}

/// Flags for `schema` as `(arg id, field, is_generation)`, in the order they are added.
fn option_fields(schema: &ConfigSchema) -> Vec<(String, &Field, bool)> {
    let model_name = schema.model_name();
    let generation = schema
        .generation()
        .fields()
        .iter()
        .map(|f| (generation_id(model_name, f.name()), f, true));
    let fields = schema
        .fields()
        .iter()
        .map(|f| (field_id(model_name, f.name()), f, false));
    // union-typed fields are only configurable through the environment
    generation
        .chain(fields)
        .filter(|(_, f, _)| !f.field_type().is_union())
        .collect()
}

fn to_arg(id: String, field: &Field) -> Arg {
    let arg = Arg::new(id.clone())
        .long(naming::dasherize(&id))
        .env(field.env().to_string())
        .help(field.description().to_string())
        .required(false);
    match field.field_type() {
        FieldType::Bool => arg
            .action(ArgAction::Set)
            .num_args(0..=1)
            .default_missing_value("true")
            .value_parser(BoolishValueParser::new()),
        FieldType::Int => arg.action(ArgAction::Set).value_parser(value_parser!(i64)),
        FieldType::Float => arg.action(ArgAction::Set).value_parser(value_parser!(f64)),
        FieldType::StrList => arg
            .action(ArgAction::Append)
            .value_delimiter(',')
            .value_parser(value_parser!(String)),
        _ => arg.action(ArgAction::Set).value_parser(value_parser!(String)),
    }
}

/// Add the schema's options to `command`, grouped under two help headings.
///
/// The `<Class> options` group is only added when the schema has top-level options.
pub fn to_cli_options(schema: &ConfigSchema, command: Command) -> Command {
    let (generation, fields): (Vec<_>, Vec<_>) = option_fields(schema)
        .into_iter()
        .partition(|(_, _, is_generation)| *is_generation);

    let generation_heading = format!("{} generation options", schema.generation().class_name());
    let command = generation.into_iter().fold(command, |command, (id, field, _)| {
        command.arg(to_arg(id, field).help_heading(generation_heading.clone()))
    });
    if fields.is_empty() {
        return command;
    }

    let heading = format!("{} options", schema.name());
    fields.into_iter().fold(command, |command, (id, field, _)| {
        command.arg(to_arg(id, field).help_heading(heading.clone()))
    })
}

/// Collect the schema's options from `matches` into a keyword map keyed by argument id.
///
/// Flags that were neither given nor set through the environment are omitted.
pub fn matches_to_kwargs(schema: &ConfigSchema, matches: &ArgMatches) -> Map<String, Value> {
    let mut kwargs = Map::new();
    for (id, field, _) in option_fields(schema) {
        if let Some(value) = match_value(matches, &id, field.field_type()) {
            kwargs.insert(id, value);
        }
    }
    kwargs
}

fn match_value(matches: &ArgMatches, id: &str, field_type: &FieldType) -> Option<Value> {
    match field_type {
        FieldType::Bool => matches
            .try_get_one::<bool>(id)
            .ok()
            .flatten()
            .map(|v| Value::Bool(*v)),
        FieldType::Int => matches
            .try_get_one::<i64>(id)
            .ok()
            .flatten()
            .map(|v| Value::from(*v)),
        FieldType::Float => matches
            .try_get_one::<f64>(id)
            .ok()
            .flatten()
            .map(|v| Value::from(*v)),
        FieldType::StrList => matches
            .try_get_many::<String>(id)
            .ok()
            .flatten()
            .map(|values| Value::from(values.cloned().collect::<Vec<_>>())),
        FieldType::Json => matches
            .try_get_one::<String>(id)
            .ok()
            .flatten()
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))),
        _ => matches
            .try_get_one::<String>(id)
            .ok()
            .flatten()
            .map(|v| Value::String(v.clone())),
    }
}
