// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::schema::ConfigSchema;
use crate::settings::{ModelSettings, ModelType};

static SCHEMA: OnceCell<Arc<ConfigSchema>> = OnceCell::new();

/// FLAN-T5, an instruction-finetuned T5.
///
/// Generation defaults can be changed per process with `SDSERVER_FLAN_T5_GENERATION_*`.
pub struct FlanT5Config;

impl FlanT5Config {
    pub fn schema() -> Result<Arc<ConfigSchema>> {
        SCHEMA.get_or_try_init(Self::declare).cloned()
    }

    fn declare() -> Result<Arc<ConfigSchema>> {
        let settings = ModelSettings::builder()
            .url("https://huggingface.co/docs/transformers/model_doc/flan-t5")
            .default_id("google/flan-t5-large")
            .model_ids([
                "google/flan-t5-small",
                "google/flan-t5-base",
                "google/flan-t5-large",
                "google/flan-t5-xl",
                "google/flan-t5-xxl",
            ])
            .model_type(ModelType::Seq2seqLm)
            .build()?;

        ConfigSchema::declare("FlanT5Config")
            .settings(settings)
            .generation_default("temperature", 0.9)
            .generation_default("max_new_tokens", 2048)
            .generation_default("top_k", 50)
            .generation_default("top_p", 0.4)
            .generation_default("repetition_penalty", 1.0)
            .build()
    }
}
