//! PE inspection via the import table.
//!
//! Windows binaries carry no embedded search path; the import table only
//! lists DLL names, and resolution happens entirely through the ordered
//! search-directory rules in the resolver.
//!
//! Direct import-table parsing is the canonical strategy. An external
//! dependency-walking tool can be swapped in through [`PeToolInspector`]
//! for cases the in-process parser does not cover, but the two strategies
//! are never mixed within one run: their completeness guarantees differ
//! (the external tool reports transitively, the parser one level deep,
//! which the closure walker completes itself).

use std::fs;
use std::path::{Path, PathBuf};

use goblin::pe::PE;

use crate::error::{Error, Result};
use crate::inspect::tool::{run_tool, DEFAULT_TOOL_TIMEOUT};
use crate::inspect::{BinaryInspector, Inspection};
use crate::model::BinaryFormat;

pub struct PeInspector;

impl BinaryInspector for PeInspector {
    fn inspect(&self, path: &Path) -> Result<Inspection> {
        let bytes = fs::read(path)?;
        let pe = PE::parse(&bytes).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            format: BinaryFormat::Pe,
            reason: e.to_string(),
        })?;

        let references = pe.libraries.iter().map(|l| (*l).to_string()).collect();

        // No RPATH equivalent on this format.
        Ok(Inspection { references, search_hints: Vec::new(), install_name: None })
    }

    fn format(&self) -> BinaryFormat {
        BinaryFormat::Pe
    }
}

/// Fallback inspector shelling out to an external dependency walker.
///
/// Contract with the tool: invoked as `<program> <binary>`, prints one
/// imported DLL name per stdout line. Lines that are empty or start with
/// `#` are ignored.
pub struct PeToolInspector {
    program: PathBuf,
}

impl PeToolInspector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl BinaryInspector for PeToolInspector {
    fn inspect(&self, path: &Path) -> Result<Inspection> {
        let output = run_tool(
            &self.program,
            [path.as_os_str()],
            DEFAULT_TOOL_TIMEOUT,
            "install a PE dependency walker or rely on the built-in import-table parser",
        )?;
        Ok(Inspection {
            references: parse_walker_output(&output.stdout),
            search_hints: Vec::new(),
            install_name: None,
        })
    }

    fn format(&self) -> BinaryFormat {
        BinaryFormat::Pe
    }
}

fn parse_walker_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
