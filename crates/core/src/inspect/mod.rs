//! Binary inspection: per-format adapters that read a binary's declared
//! dependencies and search-path hints without executing it.
//!
//! One adapter per container format (ELF, Mach-O, PE), all behind the
//! [`BinaryInspector`] trait so the closure walker stays platform-agnostic.
//! Adapters are read-only; a file that cannot be parsed as its expected
//! format is a hard error naming the artifact.

pub mod elf;
pub mod macho;
pub mod pe;
pub mod tool;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{BinaryFormat, Platform};

pub use elf::ElfInspector;
pub use macho::MachOInspector;
pub use pe::{PeInspector, PeToolInspector};

/// Raw inspection result for one binary.
///
/// `references` and `search_hints` preserve declaration order; downstream
/// resolution reuses that order for tie-breaking, so adapters must not sort
/// or deduplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    /// Declared dependencies, unresolved: bare names, `@rpath/...` forms,
    /// `$ORIGIN`-relative entries, or absolute paths.
    pub references: Vec<String>,
    /// Declared search-path hints: RPATH/RUNPATH entries or `LC_RPATH`
    /// values, raw (tokens like `$ORIGIN` are not expanded here).
    pub search_hints: Vec<String>,
    /// The binary's own embedded identity (Mach-O install name, ELF soname),
    /// used to recognize self-references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_name: Option<String>,
}

/// Format-specific dependency reader.
pub trait BinaryInspector: Send + Sync {
    /// Read declared dependencies and search hints from the binary at `path`.
    fn inspect(&self, path: &Path) -> Result<Inspection>;

    /// Container format this adapter understands.
    fn format(&self) -> BinaryFormat;
}

/// Select the inspector for a target platform, once at startup.
pub fn inspector_for(platform: Platform) -> Box<dyn BinaryInspector> {
    match platform {
        Platform::Linux => Box::new(ElfInspector),
        Platform::MacOs => Box::new(MachOInspector),
        Platform::Windows => Box::new(PeInspector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspector_selection_follows_platform() {
        assert_eq!(inspector_for(Platform::Linux).format(), BinaryFormat::Elf);
        assert_eq!(inspector_for(Platform::MacOs).format(), BinaryFormat::MachO);
        assert_eq!(inspector_for(Platform::Windows).format(), BinaryFormat::Pe);
    }
}
