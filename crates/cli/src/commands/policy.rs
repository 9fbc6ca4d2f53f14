//! User-supplied policy file layered over the built-in platform rules.
//!
//! The file is YAML:
//!
//! ```yaml
//! exclude:
//!   - libcuda.so          # leave to the driver installation
//! forbid:
//!   - libdebugonly        # must never end up in a release tree
//! extra_dirs:
//!   - /opt/vendor/lib
//! fallback_dirs:
//!   - /usr/local/lib
//! ```
//!
//! `exclude` and `forbid` match a dependency's file name exactly or by
//! prefix, so one rule covers every version suffix.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bundle_core::model::{Artifact, Platform};
use bundle_core::policy::{Decision, DefaultPolicy, PolicyEngine};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub forbid: Vec<String>,
    #[serde(default)]
    pub extra_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub fallback_dirs: Vec<PathBuf>,
}

impl PolicyFile {
    pub fn load(path: &str) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {path}"))?;
        serde_yaml::from_str(&body)
            .with_context(|| format!("Failed to parse policy file {path}"))
    }
}

/// Policy engine combining a loaded file with the platform defaults.
pub struct FilePolicy {
    file: PolicyFile,
    default: DefaultPolicy,
}

impl FilePolicy {
    pub fn new(file: PolicyFile, platform: Platform) -> Self {
        Self { file, default: DefaultPolicy::new(platform) }
    }

    pub fn fallback_dirs(&self) -> Vec<PathBuf> {
        self.file.fallback_dirs.clone()
    }
}

fn matches(pattern: &str, library: &str) -> bool {
    let name = library.rsplit('/').next().unwrap_or(library);
    name == pattern || name.starts_with(pattern)
}

impl PolicyEngine for FilePolicy {
    fn decide(&self, library: &str, consumer: &Artifact) -> Decision {
        if let Some(rule) = self.file.forbid.iter().find(|p| matches(p, library)) {
            return Decision::Forbid { rule: format!("policy-file forbid '{rule}'") };
        }
        if let Some(rule) = self.file.exclude.iter().find(|p| matches(p, library)) {
            return Decision::Exclude { rule: format!("policy-file exclude '{rule}'") };
        }
        self.default.decide(library, consumer)
    }

    fn extra_search_dirs(&self, consumer: &Artifact) -> Vec<PathBuf> {
        let mut dirs = self.file.extra_dirs.clone();
        dirs.extend(self.default.extra_search_dirs(consumer));
        dirs
    }
}
