//! ELF patching via `patchelf`.
//!
//! Setting RUNPATH to an `$ORIGIN`-relative value makes every bundled
//! dependency load relative to the binary's own final location, whatever the
//! install prefix. NEEDED entries that embed a path are renamed to their
//! bare form so the new RUNPATH covers them too.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::inspect::tool::run_tool;
use crate::model::Platform;
use crate::rewrite::{BinaryRewriter, RewritePlan};

const PATCHELF_HINT: &str = "install patchelf (e.g. `apt install patchelf` or `dnf install patchelf`)";

pub struct ElfRewriter {
    patchelf: PathBuf,
    timeout: Duration,
}

impl Default for ElfRewriter {
    fn default() -> Self {
        Self { patchelf: PathBuf::from("patchelf"), timeout: Duration::from_secs(60) }
    }
}

impl ElfRewriter {
    /// Use an explicit `patchelf` binary instead of searching `PATH`.
    pub fn with_tool(patchelf: impl Into<PathBuf>) -> Self {
        Self { patchelf: patchelf.into(), ..Self::default() }
    }
}

impl BinaryRewriter for ElfRewriter {
    fn rewrite(&self, staged: &Path, plan: &RewritePlan) -> Result<()> {
        let staged_str = staged.to_string_lossy().to_string();

        for change in &plan.changes {
            run_tool(
                &self.patchelf,
                ["--replace-needed", change.old.as_str(), change.new.as_str(), staged_str.as_str()],
                self.timeout,
                PATCHELF_HINT,
            )
            .map_err(|e| rewrite_error(staged, e))?;
        }

        if let Some(rpath) = &plan.rpath {
            run_tool(
                &self.patchelf,
                ["--set-rpath", rpath.as_str(), staged_str.as_str()],
                self.timeout,
                PATCHELF_HINT,
            )
            .map_err(|e| rewrite_error(staged, e))?;
        }

        Ok(())
    }

    fn platform(&self) -> Platform {
        Platform::Linux
    }
}

/// Tool availability stays an ExternalTool error (actionable remediation);
/// anything else becomes a RewriteError naming the binary.
fn rewrite_error(staged: &Path, source: Error) -> Error {
    match source {
        e @ Error::ExternalTool { .. } => e,
        other => Error::Rewrite { path: staged.to_path_buf(), reason: other.to_string() },
    }
}
