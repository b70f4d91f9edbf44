// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Generation parameters: the sampling hyperparameters handed to the inference engine.
//!
//! Every declared schema gets its own [`GenerationSchema`], built from the library-wide
//! field list with the author's default overrides and environment overrides baked in.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::env::field_env_key;
use crate::error::{ConfigError, Result};
use crate::field::{Field, FieldSpec, FieldType};

/// Environment infix for generation fields.
pub const GENERATION_SUFFIX: &str = "generation";

fn spec(name: &str, field_type: FieldType, default: Value, description: &str) -> FieldSpec {
    FieldSpec::new(name)
        .typed(field_type)
        .default(default)
        .description(description)
}

/// Library-wide generation fields, in declaration order.
pub static LIBRARY_FIELDS: Lazy<Vec<FieldSpec>> = Lazy::new(|| {
    use FieldType::*;
    let opt_int = || FieldType::optional(Int);
    vec![
        // text sampling
        spec("max_new_tokens", Int, 20.into(), "The maximum numbers of tokens to generate, ignoring the number of tokens in the prompt."),
        spec("min_length", Int, 0.into(), "The minimum length of the sequence to be generated."),
        spec("early_stopping", Bool, false.into(), "Stop the beam search when at least `num_beams` sentences are finished per batch."),
        spec("num_beams", Int, 1.into(), "Number of beams for beam search. 1 means no beam search."),
        spec("num_beam_groups", Int, 1.into(), "Number of groups to divide `num_beams` into in order to ensure diversity among different groups of beams."),
        spec("use_cache", Bool, true.into(), "Whether the model should use the past key/values attentions to speed up decoding."),
        spec("temperature", Float, 1.0.into(), "The value used to modulate the next token probabilities."),
        spec("top_k", Int, 50.into(), "The number of highest probability vocabulary tokens to keep for top-k-filtering."),
        spec("top_p", Float, 1.0.into(), "If set to float < 1, only the smallest set of most probable tokens with probabilities that add up to `top_p` or higher are kept for generation."),
        spec("typical_p", Float, 1.0.into(), "Local typicality measures how similar the conditional probability of predicting a target token next is to the expected conditional probability of predicting a random token next."),
        spec("epsilon_cutoff", Float, 0.0.into(), "If set to float strictly between 0 and 1, only tokens with a conditional probability greater than `epsilon_cutoff` will be sampled."),
        spec("eta_cutoff", Float, 0.0.into(), "Eta sampling, a hybrid of locally typical sampling and epsilon sampling."),
        spec("diversity_penalty", Float, 0.0.into(), "Subtracted from a beam's score if it generates a token same as any beam from other group at a particular time."),
        spec("repetition_penalty", Float, 1.0.into(), "The parameter for repetition penalty. 1.0 means no penalty."),
        spec("encoder_repetition_penalty", Float, 1.0.into(), "Exponential penalty on sequences that are not in the original input. 1.0 means no penalty."),
        spec("length_penalty", Float, 1.0.into(), "Exponential penalty to the length that is used with beam-based generation."),
        spec("no_repeat_ngram_size", Int, 0.into(), "If set to int > 0, all ngrams of that size can only occur once."),
        spec("renormalize_logits", Bool, false.into(), "Whether to renormalize the logits after applying all the logits processors or warpers."),
        spec("remove_invalid_values", Bool, false.into(), "Whether to remove possible `nan` and `inf` outputs of the model to prevent the generation method to crash."),
        spec("num_return_sequences", Int, 1.into(), "The number of independently computed returned sequences for each element in the batch."),
        spec("output_attentions", Bool, false.into(), "Whether or not to return the attentions tensors of all attention layers."),
        spec("output_scores", Bool, false.into(), "Whether or not to return the prediction scores."),
        spec("do_sample", Bool, false.into(), "Whether or not to use sampling; use greedy decoding otherwise."),
        spec("pad_token_id", opt_int(), Value::Null, "The id of the *padding* token."),
        spec("bos_token_id", opt_int(), Value::Null, "The id of the *beginning-of-sequence* token."),
        spec("eos_token_id", opt_int(), Value::Null, "The id of the *end-of-sequence* token."),
        // diffusion sampling
        spec("num_inference_steps", Int, 50.into(), "The number of denoising steps."),
        spec("guidance_scale", Float, 7.5.into(), "Classifier-free guidance scale. Higher values follow the prompt more closely at the expense of image quality."),
        spec("height", opt_int(), Value::Null, "The height in pixels of the generated image."),
        spec("width", opt_int(), Value::Null, "The width in pixels of the generated image."),
        spec("negative_prompt", FieldType::optional(Str), Value::Null, "The prompt to guide what not to include in image generation."),
        spec("num_images_per_prompt", Int, 1.into(), "The number of images to generate per prompt."),
        spec("eta", Float, 0.0.into(), "Corresponds to parameter eta in the DDIM paper. Only applies to DDIM schedulers."),
    ]
});

/// Generation parameters of one declared schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSchema {
    class_name: String,
    fields: Vec<Field>,

    /// Author-declared default overrides, kept so that extending schemas inherit them.
    #[serde(skip)]
    defaults: Map<String, Value>,
    /// Author-declared extra fields, kept for the same reason.
    #[serde(skip)]
    extra: Vec<FieldSpec>,
}

impl GenerationSchema {
    /// Resolve the generation fields for `model_name`.
    ///
    /// `top_level` holds the names of the schema's own fields; a generation field whose name is
    /// not among them also honours the unqualified `SDSERVER_<MODEL>_<FIELD>` variable.
    pub(crate) fn resolve(
        class_name: &str,
        model_name: &str,
        defaults: Map<String, Value>,
        extra: Vec<FieldSpec>,
        top_level: &HashSet<&str>,
    ) -> Result<Self> {
        let mut specs: Vec<&FieldSpec> = LIBRARY_FIELDS
            .iter()
            .filter(|s| !extra.iter().any(|e| e.name == s.name))
            .collect();
        specs.extend(extra.iter());

        if let Some(unknown) = defaults
            .keys()
            .find(|name| !specs.iter().any(|s| &s.name == *name))
        {
            return Err(ConfigError::UnknownField {
                schema: class_name.to_string(),
                field: unknown.clone(),
            });
        }

        let untyped: Vec<String> = extra
            .iter()
            .filter(|s| s.field_type.is_none())
            .map(|s| s.name.clone())
            .collect();
        if !untyped.is_empty() {
            return Err(ConfigError::MissingAnnotation(untyped));
        }

        let fields = specs
            .into_iter()
            .map(|spec| {
                let fallback = (!top_level.contains(spec.name.as_str()))
                    .then(|| field_env_key(model_name, &spec.name, None));
                let default = defaults.get(&spec.name).or(spec.default.as_ref());
                Field::resolve(spec, model_name, Some(GENERATION_SUFFIX), default, fallback)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GenerationSchema {
            class_name: class_name.to_string(),
            fields,
            defaults,
            extra,
        })
    }

    /// Name of the generated generation type, e.g. `FlanT5GenerationConfig`.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn declared_defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    pub fn declared_fields(&self) -> &[FieldSpec] {
        &self.extra
    }

    /// Build a [`GenerationConfig`] from `input`, filling the rest from the baked defaults.
    pub fn instantiate(&self, mut input: Map<String, Value>) -> Result<GenerationConfig> {
        if let Some(unknown) = input.keys().find(|k| !self.contains(k)) {
            return Err(ConfigError::UnknownField {
                schema: self.class_name.clone(),
                field: unknown.clone(),
            });
        }

        let mut values = Map::new();
        for field in &self.fields {
            let value = match input.remove(field.name()) {
                // null means "not given" unless the field is nullable
                Some(Value::Null) if field.field_type().coerce(&Value::Null).is_none() => None,
                other => other,
            };
            let value = match value {
                Some(v) => field.accept(&v)?,
                None => field
                    .default_value()
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingValue {
                        schema: self.class_name.clone(),
                        field: field.name().to_string(),
                    })?,
            };
            values.insert(field.name().to_string(), value);
        }
        Ok(GenerationConfig { values })
    }
}

/// The generation parameters of a configuration instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GenerationConfig {
    values: Map<String, Value>,
}

impl GenerationConfig {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.values.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}
