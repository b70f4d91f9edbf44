// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// How `start` prints the resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    /// Indented JSON
    #[default]
    Pretty,

    /// One JSON document per line
    Json,

    /// `KEY='value'` lines ready to be sourced by a shell
    Env,
}

impl TryFrom<&str> for Output {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> anyhow::Result<Self> {
        match s {
            "pretty" => Ok(Output::Pretty),
            "json" | "jsonl" => Ok(Output::Json),
            "env" | "dotenv" => Ok(Output::Env),
            e => Err(anyhow::anyhow!("Invalid --output option '{e}'")),
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Output::Pretty => "pretty",
            Output::Json => "json",
            Output::Env => "env",
        };
        write!(f, "{s}")
    }
}

impl Output {
    pub fn available() -> Vec<String> {
        [Output::Pretty, Output::Json, Output::Env]
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}
