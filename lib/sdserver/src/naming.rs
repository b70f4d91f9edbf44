// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Case conversions used to derive model, start and environment names from schema names.

use once_cell::sync::Lazy;
use regex::Regex;

static ACRONYM_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid regex"));
static WORD_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));

/// `StableDiffusionXL` -> `stable_diffusion_xl`, `FlanT5` -> `flan_t5`.
///
/// Already snake-cased input is returned unchanged; dashes become underscores.
pub fn underscore(word: &str) -> String {
    let word = ACRONYM_BOUNDARY.replace_all(word, "${1}_${2}");
    let word = WORD_BOUNDARY.replace_all(&word, "${1}_${2}");
    word.replace('-', "_").to_lowercase()
}

/// `stable_diffusion` -> `stable-diffusion`
pub fn dasherize(word: &str) -> String {
    word.replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ModelA", "model_a")]
    #[case("FlanT5", "flan_t5")]
    #[case("StableDiffusion", "stable_diffusion")]
    #[case("StableDiffusionXL", "stable_diffusion_xl")]
    #[case("HTTPServer", "http_server")]
    #[case("dolly-v2", "dolly_v2")]
    #[case("already_snake", "already_snake")]
    #[case("Falcon", "falcon")]
    fn test_underscore(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(underscore(input), expected);
    }

    #[test]
    fn test_underscore_is_idempotent() {
        let once = underscore("StableDiffusionXl");
        assert_eq!(underscore(&once), once);
    }

    #[test]
    fn test_dasherize() {
        assert_eq!(dasherize("model_a"), "model-a");
        assert_eq!(dasherize("falcon"), "falcon");
    }
}
