//! PE relocation support.
//!
//! Windows needs no in-binary patching: the loader resolves imports against
//! the executable's own directory and the `PATH` at launch. What it does
//! need is launch-time search-path configuration, produced here as a wrapper
//! script beside the executable.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Platform;
use crate::rewrite::{BinaryRewriter, RewritePlan};

pub struct PeRewriter;

impl BinaryRewriter for PeRewriter {
    fn rewrite(&self, _staged: &Path, _plan: &RewritePlan) -> Result<()> {
        // Import tables stay untouched; see write_launcher.
        Ok(())
    }

    fn platform(&self) -> Platform {
        Platform::Windows
    }
}

/// Write `<stem>.bat` beside the copied executable, prepending the bundled
/// library directory to `PATH` before handing off. `lib_dir` is relative to
/// the distribution root; empty means the libraries sit beside the
/// executable and only the executable's own directory is needed.
pub fn write_launcher(dist_root: &Path, exe_name: &str, lib_dir: &str) -> Result<PathBuf> {
    let stem = exe_name.strip_suffix(".exe").unwrap_or(exe_name);
    let launcher = dist_root.join(format!("{stem}.bat"));

    let lib_line = if lib_dir.is_empty() {
        r"set PATH=%~dp0;%PATH%".to_string()
    } else {
        let dos_dir = lib_dir.replace('/', "\\");
        format!(r"set PATH=%~dp0{dos_dir};%~dp0;%PATH%")
    };
    let body = format!("@echo off\r\n{lib_line}\r\n\"%~dp0{exe_name}\" %*\r\n");

    let tmp = dist_root.join(format!(".{stem}.bat.tmp"));
    fs::write(&tmp, body)?;
    fs::rename(&tmp, &launcher)?;
    Ok(launcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_prepends_library_directory() {
        let temp = tempfile::tempdir().unwrap();
        let launcher = write_launcher(temp.path(), "app.exe", "lib").unwrap();
        let body = fs::read_to_string(&launcher).unwrap();
        assert_eq!(launcher.file_name().unwrap(), "app.bat");
        assert!(body.contains(r"set PATH=%~dp0lib;%~dp0;%PATH%"));
        assert!(body.contains(r#""%~dp0app.exe" %*"#));
    }

    #[test]
    fn launcher_without_lib_dir_uses_exe_directory() {
        let temp = tempfile::tempdir().unwrap();
        let launcher = write_launcher(temp.path(), "tool.exe", "").unwrap();
        let body = fs::read_to_string(&launcher).unwrap();
        assert!(body.contains(r"set PATH=%~dp0;%PATH%"));
    }
}
