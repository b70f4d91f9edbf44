// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::schema::ConfigSchema;
use crate::settings::{ModelSettings, NameType};

static SCHEMA: OnceCell<Arc<ConfigSchema>> = OnceCell::new();

/// Falcon causal decoder models. GPU only, and the checkpoints ship custom modelling code.
pub struct FalconConfig;

impl FalconConfig {
    pub fn schema() -> Result<Arc<ConfigSchema>> {
        SCHEMA.get_or_try_init(Self::declare).cloned()
    }

    fn declare() -> Result<Arc<ConfigSchema>> {
        let settings = ModelSettings::builder()
            .name_type(NameType::Lowercase)
            .trust_remote_code(true)
            .requires_gpu(true)
            .timeout(3_600_000u64)
            .url("https://falconllm.tii.ae/")
            .requirements(["einops", "xformers", "safetensors"])
            .default_id("tiiuae/falcon-7b")
            .model_ids([
                "tiiuae/falcon-7b",
                "tiiuae/falcon-40b",
                "tiiuae/falcon-7b-instruct",
                "tiiuae/falcon-40b-instruct",
            ])
            .build()?;

        ConfigSchema::declare("FalconConfig")
            .settings(settings)
            .generation_default("max_new_tokens", 200)
            .generation_default("top_k", 10)
            .generation_default("num_return_sequences", 1)
            .generation_default("eos_token_id", 11)
            .build()
    }
}
