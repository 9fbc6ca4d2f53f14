//! Core data model for artifacts, dependency closures, and the output manifest.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk binary container format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryFormat {
    Elf,
    MachO,
    Pe,
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elf => write!(f, "ELF"),
            Self::MachO => write!(f, "Mach-O"),
            Self::Pe => write!(f, "PE"),
        }
    }
}

impl BinaryFormat {
    /// Default format for a target platform.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Linux => Self::Elf,
            Platform::MacOs => Self::MachO,
            Platform::Windows => Self::Pe,
        }
    }
}

/// Target platform for a packaging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Platform the build is running on.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

/// Role of a binary under consideration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactRole {
    Executable,
    ExtensionModule,
    SharedLibrary,
}

/// A binary on disk that participates in the closure, either as an entry
/// point handed in by the build orchestration or as a discovered dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute source path.
    pub path: PathBuf,
    /// Logical owning package, when known. Policy callbacks key off this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub role: ArtifactRole,
    /// True when the scan starts here rather than discovering it transitively.
    pub entry_point: bool,
}

impl Artifact {
    /// Entry-point artifact with the given role.
    pub fn entry(path: impl Into<PathBuf>, role: ArtifactRole) -> Self {
        Self { path: path.into(), package: None, role, entry_point: true }
    }

    /// Artifact discovered as somebody else's dependency.
    pub fn discovered(path: impl Into<PathBuf>, package: Option<String>) -> Self {
        Self { path: path.into(), package, role: ArtifactRole::SharedLibrary, entry_point: false }
    }

    /// Directory containing the artifact; empty path when there is no parent.
    pub fn dir(&self) -> PathBuf {
        self.path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    pub fn file_name(&self) -> String {
        self.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    }
}

/// One artifact referencing a library, with the raw reference string it used
/// (needed verbatim when load commands are rewritten later).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referencer {
    pub artifact: PathBuf,
    pub reference: String,
}

/// One deduplicated library in the closure.
///
/// Invariant: the orchestrator holds at most one entry per canonical source
/// path; every artifact that references the library collapses onto it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureEntry {
    /// Canonical (symlink-resolved) source path.
    pub source: PathBuf,
    /// Artifacts that declared a dependency on this library, in discovery order.
    pub referenced_by: Vec<Referencer>,
}

impl ClosureEntry {
    pub fn new(
        source: impl Into<PathBuf>,
        referencer: impl Into<PathBuf>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            referenced_by: vec![Referencer {
                artifact: referencer.into(),
                reference: reference.into(),
            }],
        }
    }

    /// Record one more referencing artifact, keeping discovery order and
    /// skipping duplicates.
    pub fn add_referencer(&mut self, referencer: &Path, reference: &str) {
        if !self.referenced_by.iter().any(|r| r.artifact == referencer) {
            self.referenced_by.push(Referencer {
                artifact: referencer.to_path_buf(),
                reference: reference.to_string(),
            });
        }
    }

    /// Artifact through which the library was first discovered.
    pub fn first_referencer(&self) -> &Referencer {
        &self.referenced_by[0]
    }

    /// Raw reference string `artifact` used for this library, if it is one
    /// of the referencers.
    pub fn reference_from(&self, artifact: &Path) -> Option<&str> {
        self.referenced_by
            .iter()
            .find(|r| r.artifact == artifact)
            .map(|r| r.reference.as_str())
    }
}

/// A library excluded from the distribution, with the rule that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub library: String,
    pub rule: String,
    /// Artifact whose dependency list triggered the decision.
    pub consumer: PathBuf,
}

/// One line of the final manifest: a library to ship and where it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Canonical source path the bytes were copied from.
    pub source: PathBuf,
    /// Destination path relative to the distribution root.
    pub destination: PathBuf,
    /// Human-readable discovery reason, e.g. `needed by /src/app`.
    pub reason: String,
    /// SHA-256 of the copied file, for downstream signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Final output of a packaging run, consumed by archiving and signing.
///
/// Entry order is discovery order and is deterministic for fixed inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    /// Libraries that were genuine runtime dependencies but stay with the OS.
    pub excluded: Vec<ExclusionRecord>,
    /// RFC 3339 timestamp of when the manifest was finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl Manifest {
    pub fn entry_for_source(&self, source: &Path) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.source == source)
    }
}
