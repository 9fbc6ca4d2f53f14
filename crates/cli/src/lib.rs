use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bundle_core::model::{Artifact, ArtifactRole, Platform};

/// Canonicalize the given path if possible, falling back to joining it onto
/// the current working directory (e.g. for paths that do not yet exist).
pub fn canonicalize_or_current(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(path))
        }
    }
}

/// Default user-scoped scan-cache directory:
/// `$XDG_CACHE_HOME/dist-bundler`, falling back to `~/.cache/dist-bundler`.
pub fn default_cache_dir() -> Option<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("dist-bundler"));
        }
    }
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache").join("dist-bundler"))
}

/// Parse a `--platform` value; `None` means the host platform.
pub fn parse_platform(value: Option<&str>) -> Result<Platform> {
    match value {
        None => Ok(Platform::host()),
        Some("linux") => Ok(Platform::Linux),
        Some("macos") => Ok(Platform::MacOs),
        Some("windows") => Ok(Platform::Windows),
        Some(other) => Err(anyhow!("Unknown platform '{other}' (expected linux, macos, windows)")),
    }
}

/// Build an entry-point artifact from a CLI path, inferring the role from
/// the file extension.
pub fn entry_artifact(path: &str) -> Result<Artifact> {
    let resolved = canonicalize_or_current(path)?;
    if !resolved.is_file() {
        return Err(anyhow!("Entry point not found: {}", resolved.display()));
    }
    let name = resolved.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let role = if name.ends_with(".so")
        || name.contains(".so.")
        || name.ends_with(".dylib")
        || name.ends_with(".dll")
        || name.ends_with(".pyd")
    {
        ArtifactRole::ExtensionModule
    } else {
        ArtifactRole::Executable
    };
    Ok(Artifact::entry(resolved, role))
}
