// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Boolean and environment parsing helpers shared by the sdserver crates.
//!
//! Every configuration field that is bound to an environment variable goes through
//! these helpers, so the accepted spellings stay identical between environment
//! overrides, JSON blobs and command-line flags.

/// Sentinel accepted by the backend selection variables (`USE_TORCH`, `USE_TF`, ...).
pub const AUTO: &str = "AUTO";

/// Check if a string is truthy.
///
/// Truthy values: "1", "true", "on", "yes" (case-insensitive)
///
/// Returns `false` for invalid values. Use [`parse_bool`] if you need to error on invalid values.
pub fn is_truthy(val: &str) -> bool {
    matches!(val.trim().to_uppercase().as_str(), "1" | "TRUE" | "ON" | "YES")
}

/// Check if a string is falsey.
///
/// Falsey values: "0", "false", "off", "no" (case-insensitive)
pub fn is_falsey(val: &str) -> bool {
    matches!(val.trim().to_uppercase().as_str(), "0" | "FALSE" | "OFF" | "NO")
}

/// Check if a string is truthy or the `AUTO` sentinel.
///
/// Used by tri-state selection flags where "AUTO" means "enable if present".
pub fn is_truthy_or_auto(val: &str) -> bool {
    is_truthy(val) || val.trim().eq_ignore_ascii_case(AUTO)
}

/// Parse a string as a boolean value, returning an error if invalid.
///
/// # Example
/// ```
/// use sdserver_config::parse_bool;
/// assert!(parse_bool("YES").unwrap());
/// assert!(!parse_bool("off").unwrap());
/// assert!(parse_bool("maybe").is_err());
/// ```
pub fn parse_bool(val: &str) -> anyhow::Result<bool> {
    if is_truthy(val) {
        Ok(true)
    } else if is_falsey(val) {
        Ok(false)
    } else {
        anyhow::bail!(
            "Invalid boolean value: '{}'. Expected one of: true/false, 1/0, on/off, yes/no",
            val
        )
    }
}

/// Check if an environment variable is truthy.
///
/// Returns `false` if the environment variable is not set or is invalid.
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Parse an environment variable as a boolean, returning an error if invalid.
///
/// * `Ok(Some(_))` - the variable is set to a truthy or falsey value
/// * `Ok(None)` - the variable is not set
/// * `Err(_)` - the variable is set to anything else
pub fn env_parse_bool(env: &str) -> anyhow::Result<Option<bool>> {
    match std::env::var(env) {
        Ok(val) => parse_bool(&val).map(Some),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => anyhow::bail!("Failed to read environment variable {}: {}", env, e),
    }
}

/// Read an environment variable upper-cased, falling back to `default` when unset.
pub fn env_upper(env: &str, default: &str) -> String {
    std::env::var(env)
        .unwrap_or_else(|_| default.to_string())
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("True"));
        assert!(is_truthy("ON"));
        assert!(is_truthy("yes"));
        assert!(is_truthy(" YES "));

        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("auto"));
        assert!(!is_truthy("random"));
    }

    #[test]
    fn test_is_falsey() {
        assert!(is_falsey("0"));
        assert!(is_falsey("False"));
        assert!(is_falsey("OFF"));
        assert!(is_falsey("no"));

        assert!(!is_falsey("1"));
        assert!(!is_falsey(""));
        assert!(!is_falsey("auto"));
    }

    #[test]
    fn test_truthy_or_auto() {
        assert!(is_truthy_or_auto("AUTO"));
        assert!(is_truthy_or_auto("auto"));
        assert!(is_truthy_or_auto("1"));
        assert!(!is_truthy_or_auto("0"));
        assert!(!is_truthy_or_auto("sometimes"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1").unwrap());
        assert!(parse_bool("TRUE").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(!parse_bool("no").unwrap());

        assert!(parse_bool("").is_err());
        assert!(parse_bool("2").is_err());
    }

    #[test]
    fn test_env_helpers() {
        temp_env::with_vars(
            vec![
                ("SDSERVER_TEST_FLAG_ON", Some("on")),
                ("SDSERVER_TEST_FLAG_BAD", Some("perhaps")),
                ("SDSERVER_TEST_FLAG_UNSET", None::<&str>),
            ],
            || {
                assert!(env_is_truthy("SDSERVER_TEST_FLAG_ON"));
                assert!(!env_is_truthy("SDSERVER_TEST_FLAG_UNSET"));
                assert_eq!(env_parse_bool("SDSERVER_TEST_FLAG_ON").unwrap(), Some(true));
                assert_eq!(env_parse_bool("SDSERVER_TEST_FLAG_UNSET").unwrap(), None);
                assert!(env_parse_bool("SDSERVER_TEST_FLAG_BAD").is_err());
                assert_eq!(env_upper("SDSERVER_TEST_FLAG_ON", "AUTO"), "ON");
                assert_eq!(env_upper("SDSERVER_TEST_FLAG_UNSET", "auto"), "AUTO");
            },
        );
    }
}
