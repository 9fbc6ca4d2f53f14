//! Error taxonomy for a packaging run.
//!
//! Every fatal category carries enough context to print a single actionable
//! message and abort the run. Recoverable conditions (corrupt cache records,
//! policy exclusions) never surface here; they are handled locally and logged.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::BinaryFormat;

/// Error type covering the whole resolve/copy/rewrite pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A binary could not be parsed as its expected format.
    #[error("Failed to parse {} as {format}: {reason}", .path.display())]
    Parse { path: PathBuf, format: BinaryFormat, reason: String },

    /// A declared dependency could not be located anywhere in the search order.
    ///
    /// `searched` lists every directory tried, in order, so the failure is
    /// diagnosable without re-running with extra logging.
    #[error(
        "Could not resolve '{reference}' (needed by {}); searched: {}",
        .artifact.display(),
        format_searched(.searched)
    )]
    Unresolved { artifact: PathBuf, reference: String, searched: Vec<PathBuf> },

    /// Policy deliberately refused a dependency that the closure requires.
    #[error(
        "Dependency '{library}' (needed by {}) is forbidden by policy rule '{rule}'",
        .artifact.display()
    )]
    Forbidden { rule: String, library: String, artifact: PathBuf },

    /// An external helper tool is missing, failed, or timed out.
    #[error("{tool}: {reason}")]
    ExternalTool { tool: String, reason: String },

    /// Patching a copied binary failed.
    #[error("Failed to rewrite {}: {reason}", .path.display())]
    Rewrite { path: PathBuf, reason: String },

    /// Two different source files want the same destination path. This is an
    /// internal-consistency failure, not user error.
    #[error(
        "Destination {} requested for both {} and {}",
        .destination.display(),
        .existing_source.display(),
        .new_source.display()
    )]
    DestinationConflict { destination: PathBuf, existing_source: PathBuf, new_source: PathBuf },

    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

fn format_searched(dirs: &[PathBuf]) -> String {
    if dirs.is_empty() {
        return "<no search directories>".to_string();
    }
    dirs.iter().map(|d| d.display().to_string()).collect::<Vec<_>>().join(", ")
}
