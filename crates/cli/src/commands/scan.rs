use anyhow::{Context, Result};
use bundle_core::closure::ClosureWalker;
use bundle_core::inspect::inspector_for;
use bundle_core::model::{ClosureEntry, ExclusionRecord};
use serde::Serialize;

use crate::commands::bundle::RunOptions;

/// JSON shape of `scan` output, consumed by reporting tooling.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub entries: Vec<ClosureEntry>,
    pub excluded: Vec<ExclusionRecord>,
    pub scanned: usize,
}

/// Compute and print the dependency closure without touching any
/// distribution directory.
pub fn scan_command(options: &RunOptions, json: bool) -> Result<()> {
    let setup = options.setup()?;
    let inspector = inspector_for(setup.platform);

    let walker =
        ClosureWalker::new(inspector.as_ref(), setup.policy.as_ref(), &setup.cache, setup.walk);
    let result = walker.walk_parallel(&setup.artifacts).context("Closure computation failed")?;

    let report = ScanReport {
        entries: result.entries,
        excluded: result.excluded,
        scanned: result.scanned,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.entries.is_empty() {
        println!("No libraries to bundle.");
    }
    for entry in &report.entries {
        println!("{}", entry.source.display());
        for referencer in &entry.referenced_by {
            println!("    needed by {} (as '{}')", referencer.artifact.display(), referencer.reference);
        }
    }
    if !report.excluded.is_empty() {
        println!("Excluded (left to the OS):");
        for record in &report.excluded {
            println!("  {} [{}]", record.library, record.rule);
        }
    }
    Ok(())
}
