//! ELF inspection via the dynamic section.
//!
//! Reads `DT_NEEDED`, `DT_RUNPATH`/`DT_RPATH`, and `DT_SONAME` by parsing the
//! headers directly. This is architecture-independent and safe for
//! cross-builds, unlike `ldd`, which runs the host dynamic linker.

use std::fs;
use std::path::Path;

use goblin::elf::Elf;

use crate::error::{Error, Result};
use crate::inspect::{BinaryInspector, Inspection};
use crate::model::BinaryFormat;

pub struct ElfInspector;

impl BinaryInspector for ElfInspector {
    fn inspect(&self, path: &Path) -> Result<Inspection> {
        let bytes = fs::read(path)?;
        let elf = Elf::parse(&bytes).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            format: BinaryFormat::Elf,
            reason: e.to_string(),
        })?;

        let mut references = Vec::new();
        let mut search_hints = Vec::new();

        for needed in &elf.libraries {
            references.push((*needed).to_string());
            // Some runtime-bundled libraries encode a relative path in NEEDED
            // itself; its containing folder is then a legitimate search dir.
            if let Some(parent) = needed.rsplit_once('/').map(|(dir, _)| dir) {
                if !parent.is_empty() {
                    search_hints.push(parent.to_string());
                }
            }
        }

        // RUNPATH supersedes RPATH when both are present.
        let raw_paths: &[&str] =
            if !elf.runpaths.is_empty() { &elf.runpaths } else { &elf.rpaths };
        for raw in raw_paths {
            for entry in raw.split(':').filter(|e| !e.is_empty()) {
                search_hints.push(entry.to_string());
            }
        }

        Ok(Inspection {
            references,
            search_hints,
            install_name: elf.soname.map(str::to_string),
        })
    }

    fn format(&self) -> BinaryFormat {
        BinaryFormat::Elf
    }
}
