// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::StableDiffusionConfig;
use crate::error::Result;
use crate::field::{FieldSpec, FieldType};
use crate::schema::ConfigSchema;
use crate::settings::ModelSettings;

static SCHEMA: OnceCell<Arc<ConfigSchema>> = OnceCell::new();

/// Stable Diffusion XL. Extends [`StableDiffusionConfig`] with the refiner stage.
pub struct StableDiffusionXlConfig;

impl StableDiffusionXlConfig {
    pub fn schema() -> Result<Arc<ConfigSchema>> {
        SCHEMA.get_or_try_init(Self::declare).cloned()
    }

    fn declare() -> Result<Arc<ConfigSchema>> {
        let settings = ModelSettings::builder()
            .url("https://huggingface.co/docs/diffusers/using-diffusers/sdxl")
            .default_id("stabilityai/stable-diffusion-xl-base-1.0")
            .model_ids([
                "stabilityai/stable-diffusion-xl-base-1.0",
                "stabilityai/stable-diffusion-xl-refiner-1.0",
            ])
            .requires_gpu(true)
            .use_pipeline(true)
            .requirements(["diffusers", "safetensors", "invisible-watermark"])
            .build()?;

        ConfigSchema::declare("StableDiffusionXlConfig")
            .extends(&StableDiffusionConfig::schema()?)
            .settings(settings)
            .field(
                FieldSpec::new("scheduler")
                    .typed(FieldType::Str)
                    .default("euler")
                    .description("Noise scheduler used by the pipeline."),
            )
            .field(
                FieldSpec::new("use_refiner")
                    .typed(FieldType::Bool)
                    .default(false)
                    .description("Run the refiner model on the base model's latents."),
            )
            .field(
                FieldSpec::new("high_noise_frac")
                    .typed(FieldType::Float)
                    .default(0.8)
                    .description("Fraction of the denoising steps run by the base model."),
            )
            .generation_default("num_inference_steps", 40)
            .generation_default("guidance_scale", 5.0)
            .generation_default("height", 1024)
            .generation_default("width", 1024)
            .build()
    }
}
