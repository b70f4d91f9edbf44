// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Availability of the optional numerical backends a model may need.
//!
//! A backend is available when its selection flag allows it, its package can be located,
//! and the package carries resolvable version metadata. Metadata is looked up again on
//! every [`BackendResolver::is_available`] call; nothing is cached between calls.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::config::environment_names::backends as env_backends;
use crate::config::is_truthy;
use crate::error::{ConfigError, Result};
use crate::schema::ConfigSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Backend {
    Torch,
    Tensorflow,
    Flax,
    Einops,
    CpmKernels,
    Bitsandbytes,
}

impl Backend {
    /// Packages that must all be present for this backend.
    pub fn packages(&self) -> &'static [&'static str] {
        match self {
            Backend::Torch => &["torch"],
            Backend::Tensorflow => &["tensorflow"],
            Backend::Flax => &["jax", "flax"],
            Backend::Einops => &["einops"],
            Backend::CpmKernels => &["cpm_kernels"],
            Backend::Bitsandbytes => &["bitsandbytes"],
        }
    }

    /// Error message shown when `name` needs this backend and it is missing.
    pub fn missing_message(&self, name: &str) -> String {
        match self {
            Backend::Torch => format!(
                "{name} requires the PyTorch library but it was not found in your environment.\n\
                 Checkout the instructions on the installation page: https://pytorch.org/get-started/locally/ \
                 and follow the ones that match your environment. Please note that you may need to restart \
                 your runtime after installation.\n"
            ),
            Backend::Tensorflow => format!(
                "{name} requires the TensorFlow library but it was not found in your environment.\n\
                 Checkout the instructions on the installation page: https://www.tensorflow.org/install \
                 and follow the ones that match your environment. Please note that you may need to restart \
                 your runtime after installation.\n"
            ),
            Backend::Flax => format!(
                "{name} requires the FLAX library but it was not found in your environment.\n\
                 Checkout the instructions on the installation page: https://github.com/google/flax \
                 and follow the ones that match your environment. Please note that you may need to restart \
                 your runtime after installation.\n"
            ),
            Backend::Einops | Backend::CpmKernels | Backend::Bitsandbytes => {
                let package = self.packages()[0];
                format!(
                    "{name} requires the {package} library but it was not found in your environment.\n\
                     You can install it with pip: `pip install {package}`. Please note that you may need \
                     to restart your runtime after installation.\n"
                )
            }
        }
    }

    /// Message used when this backend is missing but its sibling is installed.
    fn sibling_message(&self, name: &str) -> Option<String> {
        match self {
            Backend::Torch => Some(format!(
                "{name} requires the PyTorch library but it was not found in your environment.\n\
                 However, we were able to find a TensorFlow installation. TensorFlow classes begin \
                 with \"TF\", but are otherwise identically named to the PyTorch classes. This \
                 means that the TF equivalent of the class you tried to use would be \"TF{name}\".\n\
                 If you want to use TensorFlow, please use TF classes instead!\n\n\
                 If you really do want to use PyTorch please go to \
                 https://pytorch.org/get-started/locally/ and follow the instructions that \
                 match your environment.\n"
            )),
            Backend::Tensorflow => Some(format!(
                "{name} requires the TensorFlow library but it was not found in your environment.\n\
                 However, we were able to find a PyTorch installation. PyTorch classes do not begin \
                 with \"TF\", but are otherwise identically named to our TF classes.\n\
                 If you want to use PyTorch, please use those classes instead!\n\n\
                 If you really do want to use TensorFlow, please follow the instructions on the \
                 installation page https://www.tensorflow.org/install that match your environment.\n"
            )),
            _ => None,
        }
    }

    fn sibling(&self) -> Option<Backend> {
        match self {
            Backend::Torch => Some(Backend::Tensorflow),
            Backend::Tensorflow => Some(Backend::Torch),
            _ => None,
        }
    }
}

/// Tri-state value of a selection variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Selection {
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl Selection {
    pub fn from_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case(sdserver_config::AUTO) {
            Selection::Auto
        } else if is_truthy(value) {
            Selection::Enabled
        } else {
            Selection::Disabled
        }
    }

    fn from_env(var: &str) -> Self {
        Selection::from_value(&sdserver_config::env_upper(var, sdserver_config::AUTO))
    }

    /// "AUTO" or truthy.
    pub fn allows(&self) -> bool {
        !matches!(self, Selection::Disabled)
    }

    pub fn forced(&self) -> bool {
        matches!(self, Selection::Enabled)
    }
}

/// Backend selection flags, normally read from `USE_TORCH`, `USE_TF`, `USE_FLAX` and
/// `FORCE_TF_AVAILABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendSelection {
    pub use_torch: Selection,
    pub use_tf: Selection,
    pub use_flax: Selection,
    pub force_tf_available: Selection,
}

impl BackendSelection {
    pub fn from_env() -> Self {
        BackendSelection {
            use_torch: Selection::from_env(env_backends::USE_TORCH),
            use_tf: Selection::from_env(env_backends::USE_TF),
            use_flax: Selection::from_env(env_backends::USE_FLAX),
            force_tf_available: Selection::from_env(env_backends::FORCE_TF_AVAILABLE),
        }
    }
}

/// Where package presence and version metadata come from.
pub trait PackageIndex: Send + Sync {
    /// Whether the package itself can be located.
    fn find_spec(&self, package: &str) -> bool;

    /// Installed version from the package metadata.
    fn version(&self, package: &str) -> Option<String>;

    fn is_package_available(&self, package: &str) -> bool {
        self.find_spec(package) && self.version(package).is_some()
    }
}

/// Python site-packages directories, searched in order.
#[derive(Debug, Clone, Default)]
pub struct SitePackages {
    roots: Vec<PathBuf>,
}

impl SitePackages {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        SitePackages { roots }
    }

    /// Roots from `SDSERVER_SITE_PACKAGES` (platform path-list syntax).
    pub fn from_env() -> Self {
        let roots = std::env::var_os(env_backends::SDSERVER_SITE_PACKAGES)
            .map(|paths| std::env::split_paths(&paths).collect())
            .unwrap_or_default();
        SitePackages { roots }
    }
}

impl PackageIndex for SitePackages {
    fn find_spec(&self, package: &str) -> bool {
        self.roots.iter().any(|root| {
            root.join(package).is_dir() || root.join(format!("{package}.py")).is_file()
        })
    }

    fn version(&self, package: &str) -> Option<String> {
        let normalized = package.replace('-', "_").to_lowercase();
        self.roots.iter().find_map(|root| {
            let entries = fs::read_dir(root).ok()?;
            entries.filter_map(|e| e.ok()).find_map(|entry| {
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                let stem = file_name
                    .strip_suffix(".dist-info")
                    .or_else(|| file_name.strip_suffix(".egg-info"))?;
                let (name, version) = stem.split_once('-')?;
                (name.replace('-', "_").to_lowercase() == normalized && !version.is_empty())
                    .then(|| version.to_string())
            })
        })
    }
}

/// Fixed package table, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticPackages {
    packages: HashMap<String, Option<String>>,
}

impl StaticPackages {
    /// A package that is present with `version`; `None` means present without metadata.
    pub fn with(mut self, package: &str, version: Option<&str>) -> Self {
        self.packages
            .insert(package.to_string(), version.map(String::from));
        self
    }
}

impl PackageIndex for StaticPackages {
    fn find_spec(&self, package: &str) -> bool {
        self.packages.contains_key(package)
    }

    fn version(&self, package: &str) -> Option<String> {
        self.packages.get(package).cloned().flatten()
    }
}

/// Answers backend availability questions on demand.
pub struct BackendResolver {
    selection: BackendSelection,
    index: Box<dyn PackageIndex>,
}

impl BackendResolver {
    pub fn new(selection: BackendSelection, index: impl PackageIndex + 'static) -> Self {
        BackendResolver {
            selection,
            index: Box::new(index),
        }
    }

    /// Selection flags and site-packages roots from the process environment.
    pub fn from_env() -> Self {
        BackendResolver::new(BackendSelection::from_env(), SitePackages::from_env())
    }

    pub fn selection(&self) -> &BackendSelection {
        &self.selection
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        let selection = &self.selection;
        match backend {
            Backend::Torch => {
                if selection.use_torch.allows() && !selection.use_tf.forced() {
                    self.packages_available(backend)
                } else {
                    tracing::info!("Disabling PyTorch because USE_TF is set");
                    false
                }
            }
            Backend::Tensorflow => {
                if selection.force_tf_available.forced() {
                    return true;
                }
                if selection.use_tf.allows() && !selection.use_torch.forced() {
                    self.packages_available(backend)
                } else {
                    tracing::info!("Disabling Tensorflow because USE_TORCH is set");
                    false
                }
            }
            Backend::Flax => selection.use_flax.allows() && self.packages_available(backend),
            _ => self.packages_available(backend),
        }
    }

    fn packages_available(&self, backend: Backend) -> bool {
        backend
            .packages()
            .iter()
            .all(|package| self.index.is_package_available(package))
    }

    /// Every backend currently available.
    pub fn available(&self) -> Vec<Backend> {
        Backend::iter().filter(|b| self.is_available(*b)).collect()
    }

    /// Fail with a descriptive message when any of `backends` is missing for `name`.
    pub fn require(&self, name: &str, backends: &[Backend]) -> Result<()> {
        for backend in [Backend::Torch, Backend::Tensorflow] {
            if !backends.contains(&backend) || self.is_available(backend) {
                continue;
            }
            if let Some(sibling) = backend.sibling() {
                if self.is_available(sibling) {
                    if let Some(message) = backend.sibling_message(name) {
                        return Err(ConfigError::MissingBackend(message));
                    }
                }
            }
        }

        let failed: Vec<String> = backends
            .iter()
            .filter(|backend| !self.is_available(**backend))
            .map(|backend| backend.missing_message(name))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingBackend(failed.join("")))
        }
    }
}

/// Map a requirement string (`"einops"`, `"torch>=2"`) to a known backend, if any.
pub fn backend_for_requirement(requirement: &str) -> Option<Backend> {
    let name: String = requirement
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    match name.replace('-', "_").to_lowercase().as_str() {
        "jax" => Some(Backend::Flax),
        other => other.parse().ok(),
    }
}

/// Backends a schema needs: the selected framework plus any known requirement.
pub fn required_backends(schema: &ConfigSchema) -> Result<Vec<Backend>> {
    let mut backends = vec![schema.env().framework_backend()?];
    for requirement in schema.settings().requirements().iter().flatten() {
        if let Some(backend) = backend_for_requirement(requirement) {
            if !backends.contains(&backend) {
                backends.push(backend);
            }
        }
    }
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> BackendSelection {
        BackendSelection::default()
    }

    #[test]
    fn test_selection_from_value() {
        assert_eq!(Selection::from_value("AUTO"), Selection::Auto);
        assert_eq!(Selection::from_value("yes"), Selection::Enabled);
        assert_eq!(Selection::from_value("0"), Selection::Disabled);
        assert_eq!(Selection::from_value("whatever"), Selection::Disabled);
        assert!(sdserver_config::is_truthy_or_auto("auto"));
    }

    #[test]
    fn test_selection_from_env() {
        temp_env::with_vars(
            vec![
                (env_backends::USE_TORCH, None::<&str>),
                (env_backends::USE_TF, Some("1")),
                (env_backends::USE_FLAX, Some("off")),
                (env_backends::FORCE_TF_AVAILABLE, None),
            ],
            || {
                let s = BackendSelection::from_env();
                assert_eq!(s.use_torch, Selection::Auto);
                assert_eq!(s.use_tf, Selection::Enabled);
                assert_eq!(s.use_flax, Selection::Disabled);
                assert_eq!(s.force_tf_available, Selection::Auto);
            },
        );
    }

    #[test]
    fn test_metadata_is_required() {
        let index = StaticPackages::default()
            .with("torch", Some("2.1.0"))
            .with("einops", None);
        let resolver = BackendResolver::new(selection(), index);
        assert!(resolver.is_available(Backend::Torch));
        assert!(!resolver.is_available(Backend::Einops));
        assert!(!resolver.is_available(Backend::Flax));
    }

    #[test]
    fn test_use_tf_disables_torch() {
        let index = StaticPackages::default().with("torch", Some("2.1.0"));
        let mut s = selection();
        s.use_tf = Selection::Enabled;
        let resolver = BackendResolver::new(s, index);
        assert!(!resolver.is_available(Backend::Torch));
    }

    #[test]
    fn test_flax_needs_both_packages() {
        let index = StaticPackages::default().with("jax", Some("0.4.20"));
        let resolver = BackendResolver::new(selection(), index.clone());
        assert!(!resolver.is_available(Backend::Flax));

        let resolver = BackendResolver::new(selection(), index.with("flax", Some("0.7.5")));
        assert!(resolver.is_available(Backend::Flax));
        assert_eq!(resolver.available(), vec![Backend::Flax]);
    }

    #[test]
    fn test_require_messages() {
        let resolver = BackendResolver::new(selection(), StaticPackages::default());
        let err = resolver
            .require("StableDiffusion", &[Backend::Torch, Backend::Einops])
            .unwrap_err()
            .to_string();
        assert!(err.contains("StableDiffusion requires the PyTorch library"));
        assert!(err.contains("pip install einops"));

        let resolver = BackendResolver::new(
            selection(),
            StaticPackages::default().with("tensorflow", Some("2.13.0")),
        );
        let err = resolver
            .require("StableDiffusion", &[Backend::Torch])
            .unwrap_err()
            .to_string();
        assert!(err.contains("we were able to find a TensorFlow installation"));
        assert!(err.contains("TFStableDiffusion"));

        let resolver = BackendResolver::new(
            selection(),
            StaticPackages::default().with("torch", Some("2.1.0")),
        );
        assert!(resolver.require("StableDiffusion", &[Backend::Torch]).is_ok());
    }

    #[test]
    fn test_site_packages() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("torch")).unwrap();
        fs::create_dir(dir.path().join("torch-2.1.0.dist-info")).unwrap();
        fs::write(dir.path().join("einops.py"), "").unwrap();

        let index = SitePackages::new(vec![dir.path().to_path_buf()]);
        assert!(index.find_spec("torch"));
        assert_eq!(index.version("torch").as_deref(), Some("2.1.0"));
        assert!(index.is_package_available("torch"));
        assert!(index.find_spec("einops"));
        assert!(!index.is_package_available("einops"));

        // metadata is looked up on each call
        fs::create_dir(dir.path().join("einops-0.7.0.dist-info")).unwrap();
        assert!(index.is_package_available("einops"));
    }

    #[test]
    fn test_backend_for_requirement() {
        assert_eq!(backend_for_requirement("einops"), Some(Backend::Einops));
        assert_eq!(backend_for_requirement("torch>=2.0"), Some(Backend::Torch));
        assert_eq!(backend_for_requirement("cpm-kernels"), Some(Backend::CpmKernels));
        assert_eq!(backend_for_requirement("jax"), Some(Backend::Flax));
        assert_eq!(backend_for_requirement("safetensors"), None);
    }

    #[test]
    fn test_required_backends() {
        let falcon = crate::models::FalconConfig::schema().unwrap();
        temp_env::with_vars(vec![("SDSERVER_FALCON_FRAMEWORK", None::<&str>)], || {
            assert_eq!(
                required_backends(&falcon).unwrap(),
                vec![Backend::Torch, Backend::Einops]
            );
        });
        temp_env::with_vars(vec![("SDSERVER_FALCON_FRAMEWORK", Some("flax"))], || {
            assert_eq!(
                required_backends(&falcon).unwrap(),
                vec![Backend::Flax, Backend::Einops]
            );
        });
    }
}
