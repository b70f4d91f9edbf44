// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Value};

use sdserver::backends::{required_backends, BackendResolver};
use sdserver::config::environment_names::launcher::SDSERVER_DECLARATION;
use sdserver::{cli, models, ConfigDeclaration, ConfigSchema, ModelEnv, SdConfig};

mod opt;
pub use opt::Output;

const DECLARATION: &str = "declaration";

/// Schemas the launcher knows about: the built-in models plus an optional declaration file.
pub fn schemas(declaration: Option<&Path>) -> anyhow::Result<Vec<Arc<ConfigSchema>>> {
    let mut schemas = models::registry()?;
    if let Some(path) = declaration {
        let declaration = ConfigDeclaration::from_file(path)
            .with_context(|| format!("loading declaration {}", path.display()))?;
        let schema = ConfigSchema::from_declaration(declaration)
            .with_context(|| format!("declaring schema from {}", path.display()))?;
        schemas.push(schema);
    }
    Ok(schemas)
}

/// The `--declaration` path, looked up before the parser exists because the parser depends
/// on it. Falls back to `SDSERVER_DECLARATION`.
pub fn declaration_path<I, S>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        if arg == "--" {
            break;
        }
        if arg == "--declaration" {
            return args.next().map(|path| PathBuf::from(path.as_ref()));
        }
        if let Some(path) = arg.strip_prefix("--declaration=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os(SDSERVER_DECLARATION)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `start <model>`: the model's generated flags plus launcher options.
fn model_command(schema: &ConfigSchema) -> Command {
    let settings = schema.settings();
    let command = Command::new(settings.start_name().to_string())
        .about(format!(
            "Resolve the configuration of {} (default model id '{}')",
            schema.name(),
            settings.default_id()
        ))
        .arg(
            Arg::new("model_id")
                .long("model-id")
                .env(schema.env().model_id().to_string())
                .help("Pretrained model id or path. Defaults to the model's default id"),
        )
        .arg(
            Arg::new("no_backend_check")
                .long("no-backend-check")
                .action(ArgAction::SetTrue)
                .help("Do not check that the required numerical backends are installed"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .default_value(Output::default().to_string())
                .help(format!("One of: {}", Output::available().join(", "))),
        );
    cli::to_cli_options(schema, command)
}

pub fn command(schemas: &[Arc<ConfigSchema>]) -> Command {
    let start = schemas.iter().fold(
        Command::new("start")
            .about("Resolve a model configuration from the environment and flags")
            .subcommand_required(true),
        |start, schema| start.subcommand(model_command(schema)),
    );

    Command::new("sdserver")
        .about("sdserver model configuration")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(DECLARATION)
                .long("declaration")
                .global(true)
                .env(SDSERVER_DECLARATION)
                .value_parser(value_parser!(PathBuf))
                .help("TOML or JSON schema declaration to add to the built-in models"),
        )
        .subcommand(Command::new("models").about("List the available models"))
        .subcommand(
            Command::new("env")
                .about("Print the environment variables a model reads")
                .arg(Arg::new("model").required(true)),
        )
        .subcommand(start)
}

fn find<'a>(schemas: &'a [Arc<ConfigSchema>], name: &str) -> anyhow::Result<&'a Arc<ConfigSchema>> {
    schemas
        .iter()
        .find(|schema| {
            let settings = schema.settings();
            settings.start_name() == name || settings.model_name() == name || schema.name() == name
        })
        .ok_or_else(|| anyhow::anyhow!("Unknown model '{name}'. Run `sdserver models` to list them"))
}

/// Run the parsed command line, returning what should be printed.
pub fn run(matches: &ArgMatches, schemas: &[Arc<ConfigSchema>]) -> anyhow::Result<String> {
    match matches.subcommand() {
        Some(("models", _)) => Ok(list_models(schemas)),
        Some(("env", sub)) => {
            let name = sub
                .get_one::<String>("model")
                .context("missing model name")?;
            Ok(list_env(find(schemas, name)?))
        }
        Some(("start", sub)) => {
            let (name, model_matches) = sub.subcommand().context("missing model")?;
            start(find(schemas, name)?, model_matches)
        }
        Some((other, _)) => anyhow::bail!("Unknown command '{other}'"),
        None => anyhow::bail!("No command given"),
    }
}

fn list_models(schemas: &[Arc<ConfigSchema>]) -> String {
    let mut lines = vec![format!("{:<24} {:<28} {}", "START NAME", "SCHEMA", "DEFAULT ID")];
    for schema in schemas {
        let settings = schema.settings();
        lines.push(format!(
            "{:<24} {:<28} {}",
            settings.start_name(),
            schema.name(),
            settings.default_id()
        ));
    }
    lines.join("\n")
}

fn list_env(schema: &ConfigSchema) -> String {
    let env = schema.env();
    let mut lines: Vec<String> = ModelEnv::KEYS
        .iter()
        .filter_map(|key| env.get(key).ok())
        .map(String::from)
        .collect();
    lines.extend(schema.fields().iter().map(|f| f.env().to_string()));
    lines.extend(schema.generation().fields().iter().map(|f| f.env().to_string()));
    lines.join("\n")
}

fn start(schema: &Arc<ConfigSchema>, matches: &ArgMatches) -> anyhow::Result<String> {
    let settings = schema.settings();
    let output = match matches.get_one::<String>("output") {
        Some(output) => Output::try_from(output.as_str())?,
        None => Output::default(),
    };

    let kwargs = cli::matches_to_kwargs(schema, matches);
    let (config, _) = SdConfig::from_cli(schema, kwargs)
        .with_context(|| format!("resolving {}", schema.name()))?;

    let model_id = matches
        .get_one::<String>("model_id")
        .cloned()
        .unwrap_or_else(|| settings.default_id().clone());
    if !settings.model_ids().contains(&model_id) {
        tracing::warn!(
            model_id = %model_id,
            "'{model_id}' is not one of the known ids of {}",
            schema.name()
        );
    }

    if !matches.get_flag("no_backend_check") {
        let backends = required_backends(schema)?;
        BackendResolver::from_env().require(schema.stem(), &backends)?;
    }

    tracing::info!(
        model = %settings.model_name(),
        model_id = %model_id,
        "resolved configuration"
    );

    let resolved = json!({
        "model_name": settings.model_name(),
        "start_name": settings.start_name(),
        "service_name": settings.service_name(),
        "model_id": model_id,
        "framework": schema.env().framework_value(),
        "timeout": settings.timeout(),
        "workers_per_resource": settings.workers_per_resource(),
        "config": Value::Object(config.model_dump(false)),
    });

    Ok(match output {
        Output::Pretty => serde_json::to_string_pretty(&resolved)?,
        Output::Json => serde_json::to_string(&resolved)?,
        Output::Env => [
            (schema.env().model_id().as_str(), model_id),
            (schema.env().config().as_str(), config.model_dump_json(false)?),
        ]
        .iter()
        .map(|(var, value)| format!("{var}={}", shell_quote(value)))
        .collect::<Vec<_>>()
        .join("\n"),
    })
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> anyhow::Result<String> {
        let schemas = schemas(declaration_path(args.iter().skip(1)).as_deref())?;
        let matches = command(&schemas).try_get_matches_from(args)?;
        run(&matches, &schemas)
    }

    #[test]
    fn test_command_is_consistent() {
        let schemas = schemas(None).unwrap();
        command(&schemas).debug_assert();
    }

    #[test]
    fn test_declaration_path() {
        temp_env::with_var(SDSERVER_DECLARATION, None::<&str>, || {
            assert_eq!(
                declaration_path(["start", "--declaration", "a.toml"]),
                Some(PathBuf::from("a.toml"))
            );
            assert_eq!(
                declaration_path(["--declaration=b.json", "models"]),
                Some(PathBuf::from("b.json"))
            );
            assert_eq!(declaration_path(["--", "--declaration", "c.toml"]), None);
            assert_eq!(declaration_path(["models"]), None);
        });
        temp_env::with_var(SDSERVER_DECLARATION, Some("d.toml"), || {
            assert_eq!(declaration_path(["models"]), Some(PathBuf::from("d.toml")));
        });
    }

    #[test]
    fn test_models_and_env() {
        temp_env::with_var(SDSERVER_DECLARATION, None::<&str>, || {
            let listed = run_args(&["sdserver", "models"]).unwrap();
            assert!(listed.contains("flan-t5"));
            assert!(listed.contains("StableDiffusionXlConfig"));

            let env = run_args(&["sdserver", "env", "falcon"]).unwrap();
            assert!(env.lines().any(|l| l == "SDSERVER_FALCON_CONFIG"));
            assert!(env.lines().any(|l| l == "SDSERVER_FALCON_GENERATION_TOP_K"));

            assert!(run_args(&["sdserver", "env", "gpt-9"]).is_err());
        });
    }

    #[test]
    fn test_start() {
        temp_env::with_vars(
            vec![
                (SDSERVER_DECLARATION, None::<&str>),
                ("SDSERVER_FLAN_T5_CONFIG", None),
                ("SDSERVER_FLAN_T5_MODEL_ID", None),
            ],
            || {
                let out = run_args(&[
                    "sdserver",
                    "start",
                    "flan-t5",
                    "--no-backend-check",
                    "--output",
                    "json",
                    "--flan-t5-generation-top-k",
                    "7",
                ])
                .unwrap();
                let resolved: Value = serde_json::from_str(&out).unwrap();
                assert_eq!(resolved["model_id"], json!("google/flan-t5-large"));
                assert_eq!(resolved["config"]["generation_config"]["top_k"], json!(7));
                assert_eq!(resolved["config"]["generation_config"]["temperature"], json!(0.9));
            },
        );
    }

    #[test]
    fn test_start_env_output() {
        temp_env::with_vars(
            vec![
                (SDSERVER_DECLARATION, None::<&str>),
                ("SDSERVER_FALCON_CONFIG", None),
                ("SDSERVER_FALCON_MODEL_ID", None),
            ],
            || {
                let out = run_args(&[
                    "sdserver",
                    "start",
                    "falcon",
                    "--no-backend-check",
                    "--output",
                    "env",
                    "--model-id",
                    "tiiuae/falcon-40b",
                ])
                .unwrap();
                let mut lines = out.lines();
                assert_eq!(
                    lines.next(),
                    Some("SDSERVER_FALCON_MODEL_ID='tiiuae/falcon-40b'")
                );
                assert!(lines
                    .next()
                    .is_some_and(|l| l.starts_with("SDSERVER_FALCON_CONFIG='{")));
            },
        );
    }

    #[test]
    fn test_start_declared_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.toml");
        std::fs::write(
            &path,
            r#"
name = "TinyDiffusionConfig"
extends = "stable-diffusion"

[settings]
default_id = "org/tiny-diffusion"
model_ids = ["org/tiny-diffusion"]

[generation]
num_inference_steps = 20
"#,
        )
        .unwrap();
        let path = path.display().to_string();

        temp_env::with_var(SDSERVER_DECLARATION, None::<&str>, || {
            let out = run_args(&[
                "sdserver",
                "--declaration",
                &path,
                "start",
                "tiny-diffusion",
                "--no-backend-check",
                "--tiny-diffusion-scheduler",
                "euler",
            ])
            .unwrap();
            let resolved: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(resolved["model_id"], json!("org/tiny-diffusion"));
            assert_eq!(resolved["config"]["scheduler"], json!("euler"));
            assert_eq!(
                resolved["config"]["generation_config"]["num_inference_steps"],
                json!(20)
            );
        });
    }

    #[test]
    fn test_output_option() {
        assert_eq!(Output::try_from("jsonl").unwrap(), Output::Json);
        assert_eq!(Output::Env.to_string(), "env");
        assert!(Output::try_from("yaml").is_err());
    }
}
