//! Copying bundled libraries into the distribution tree and patching the
//! copies so they load from their new relative locations.
//!
//! Nothing here ever touches an original source artifact. Every file goes
//! through the same discipline: copy to a temp sibling at the destination,
//! patch the temp file, then rename it into place. A failed rewrite leaves
//! no half-written binary behind.

pub mod elf;
pub mod macho;
pub mod pe;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::Platform;

pub use elf::ElfRewriter;
pub use macho::MachORewriter;
pub use pe::{write_launcher, PeRewriter};

/// One load-reference update: the raw string the binary currently carries
/// and the relative form it must carry in the distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceChange {
    pub old: String,
    pub new: String,
}

/// Everything a format-specific rewriter needs for one binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewritePlan {
    /// Per-reference updates (Mach-O load commands, path-like ELF NEEDED).
    pub changes: Vec<ReferenceChange>,
    /// New RPATH/RUNPATH value, relative to the binary's own location.
    pub rpath: Option<String>,
    /// New embedded install name, for a shipped library that identifies
    /// itself.
    pub install_name: Option<String>,
}

impl RewritePlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.rpath.is_none() && self.install_name.is_none()
    }
}

/// Format-specific patching of one staged binary.
pub trait BinaryRewriter: Send + Sync {
    /// Patch the writable copy at `staged` in place according to `plan`.
    fn rewrite(&self, staged: &Path, plan: &RewritePlan) -> Result<()>;

    fn platform(&self) -> Platform;
}

/// Select the rewriter for a target platform, once at startup.
pub fn rewriter_for(platform: Platform) -> Box<dyn BinaryRewriter> {
    match platform {
        Platform::Linux => Box::new(ElfRewriter::default()),
        Platform::MacOs => Box::new(MachORewriter::default()),
        Platform::Windows => Box::new(PeRewriter),
    }
}

/// Copy `source` to a temp sibling of `dest`, returning the temp path.
///
/// The copy keeps the source's permission bits but is always made
/// owner-writable so the rewriter can patch it.
pub fn stage(source: &Path, dest: &Path) -> Result<PathBuf> {
    let parent = dest.parent().ok_or_else(|| Error::Rewrite {
        path: dest.to_path_buf(),
        reason: "destination has no parent directory".into(),
    })?;
    fs::create_dir_all(parent)?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "staged".into());
    let tmp = parent.join(format!(".{file_name}.tmp"));
    fs::copy(source, &tmp)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&tmp)?.permissions();
        perms.set_mode(perms.mode() | 0o200);
        fs::set_permissions(&tmp, perms)?;
    }

    Ok(tmp)
}

/// Atomically move a staged (and possibly rewritten) file onto `dest`.
pub fn commit(staged: &Path, dest: &Path) -> Result<()> {
    fs::rename(staged, dest)?;
    Ok(())
}

/// Stage, rewrite, and commit one binary in a single step.
pub fn install(
    source: &Path,
    dest: &Path,
    plan: &RewritePlan,
    rewriter: &dyn BinaryRewriter,
) -> Result<()> {
    let staged = stage(source, dest)?;
    if !plan.is_empty() {
        if let Err(e) = rewriter.rewrite(&staged, plan) {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
    }
    commit(&staged, dest)
}

/// Byte-for-byte comparison, used to skip re-copying unchanged files.
pub fn files_identical(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (fs::metadata(a), fs::metadata(b)) else {
        return false;
    };
    if meta_a.len() != meta_b.len() {
        return false;
    }
    match (fs::read(a), fs::read(b)) {
        (Ok(bytes_a), Ok(bytes_b)) => bytes_a == bytes_b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct RecordingRewriter;

    impl BinaryRewriter for RecordingRewriter {
        fn rewrite(&self, staged: &Path, plan: &RewritePlan) -> Result<()> {
            // Simulate a patch by appending the rpath value.
            let mut bytes = fs::read(staged)?;
            if let Some(rpath) = &plan.rpath {
                bytes.extend_from_slice(rpath.as_bytes());
            }
            fs::write(staged, bytes)?;
            Ok(())
        }

        fn platform(&self) -> Platform {
            Platform::Linux
        }
    }

    struct FailingRewriter;

    impl BinaryRewriter for FailingRewriter {
        fn rewrite(&self, staged: &Path, _plan: &RewritePlan) -> Result<()> {
            Err(Error::Rewrite { path: staged.to_path_buf(), reason: "boom".into() })
        }

        fn platform(&self) -> Platform {
            Platform::Linux
        }
    }

    #[test]
    fn install_stages_rewrites_and_commits() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("libfoo.so");
        fs::write(&source, b"ELF").unwrap();
        let dest = temp.path().join("dist/libfoo.so");

        let plan = RewritePlan { rpath: Some("$ORIGIN".into()), ..RewritePlan::default() };
        install(&source, &dest, &plan, &RecordingRewriter).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"ELF$ORIGIN");
        // Source untouched; no temp leftovers.
        assert_eq!(fs::read(&source).unwrap(), b"ELF");
        assert!(!temp.path().join("dist/.libfoo.so.tmp").exists());
    }

    #[test]
    fn failed_rewrite_leaves_no_destination_file() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("libfoo.so");
        fs::write(&source, b"ELF").unwrap();
        let dest = temp.path().join("dist/libfoo.so");

        let plan = RewritePlan { rpath: Some("$ORIGIN".into()), ..RewritePlan::default() };
        let err = install(&source, &dest, &plan, &FailingRewriter).unwrap_err();
        assert!(matches!(err, Error::Rewrite { .. }));
        assert!(!dest.exists());
        assert!(!temp.path().join("dist/.libfoo.so.tmp").exists());
    }

    #[test]
    fn empty_plan_skips_the_rewriter() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("plain.dll");
        fs::write(&source, b"MZ").unwrap();
        let dest = temp.path().join("dist/plain.dll");

        install(&source, &dest, &RewritePlan::default(), &FailingRewriter).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"MZ");
    }

    #[test]
    fn files_identical_detects_differences() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        assert!(files_identical(&a, &b));
        fs::write(&b, b"diff").unwrap();
        assert!(!files_identical(&a, &b));
    }
}
