// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::Result;
use crate::field::{FieldSpec, FieldType};
use crate::schema::ConfigSchema;
use crate::settings::ModelSettings;

static SCHEMA: OnceCell<Arc<ConfigSchema>> = OnceCell::new();

/// Stable Diffusion text-to-image pipelines (v1.5 and v2.x).
pub struct StableDiffusionConfig;

impl StableDiffusionConfig {
    pub fn schema() -> Result<Arc<ConfigSchema>> {
        SCHEMA.get_or_try_init(Self::declare).cloned()
    }

    fn declare() -> Result<Arc<ConfigSchema>> {
        let settings = ModelSettings::builder()
            .url("https://huggingface.co/docs/diffusers/api/pipelines/stable_diffusion/text2img")
            .default_id("stabilityai/stable-diffusion-2-1")
            .model_ids([
                "runwayml/stable-diffusion-v1-5",
                "stabilityai/stable-diffusion-2-1-base",
                "stabilityai/stable-diffusion-2-1",
            ])
            .use_pipeline(true)
            .requirements(["diffusers", "safetensors"])
            .build()?;

        ConfigSchema::declare("StableDiffusionConfig")
            .settings(settings)
            .field(
                FieldSpec::new("scheduler")
                    .typed(FieldType::Str)
                    .default("pndm")
                    .description("Noise scheduler used by the pipeline."),
            )
            .field(
                FieldSpec::new("enable_attention_slicing")
                    .typed(FieldType::Bool)
                    .default(false)
                    .description("Compute attention in slices to lower peak memory."),
            )
            .field(
                FieldSpec::new("safety_checker")
                    .typed(FieldType::Bool)
                    .default(true)
                    .description("Run the safety checker on generated images."),
            )
            .field(
                FieldSpec::new("lora_scale")
                    .typed(FieldType::optional(FieldType::Float))
                    .default(Value::Null),
            )
            .generation_default("num_inference_steps", 50)
            .generation_default("guidance_scale", 7.5)
            .generation_default("height", 768)
            .generation_default("width", 768)
            .build()
    }
}
