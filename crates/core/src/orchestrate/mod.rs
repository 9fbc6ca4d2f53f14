//! The orchestrator: one operation tying closure resolution, policy,
//! copying, and rewriting together over the full set of entry points.
//!
//! All collaborators are injected; the orchestrator owns no global state and
//! is safe to invoke repeatedly against an already-populated distribution
//! directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tracing::info_span;

use crate::cache::ScanCache;
use crate::closure::{ClosureResult, ClosureWalker, WalkConfig};
use crate::error::{Error, Result};
use crate::inspect::BinaryInspector;
use crate::model::{Artifact, ArtifactRole, Manifest, ManifestEntry, Platform};
use crate::policy::PolicyEngine;
use crate::rewrite::{
    files_identical, install, write_launcher, BinaryRewriter, ReferenceChange, RewritePlan,
};
use crate::util::sha256_file;

/// Configuration for one packaging run.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Root of the distribution tree being assembled.
    pub dist_dir: PathBuf,
    /// Subdirectory (relative to the root) bundled libraries land in; empty
    /// places them beside the executables.
    pub lib_dir: String,
    pub platform: Platform,
    pub walk: WalkConfig,
}

impl BundleConfig {
    pub fn new(dist_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self { dist_dir: dist_dir.into(), lib_dir: String::new(), platform, walk: WalkConfig::default() }
    }
}

/// Progress notifications emitted while a run advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    ScanStarted { entry_points: usize },
    ClosureResolved { libraries: usize, excluded: usize, scanned: usize },
    Installed { source: PathBuf, destination: PathBuf },
    LauncherWritten { path: PathBuf },
    Finished { entries: usize },
}

/// Receives progress events; implemented by frontends.
pub trait ProgressReporter: Send + Sync {
    fn event(&self, event: &ProgressEvent);
}

/// Reporter that drops everything.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn event(&self, _event: &ProgressEvent) {}
}

/// Drives closure resolution, filtering, copying, and rewriting.
pub struct Orchestrator<'a> {
    inspector: &'a dyn BinaryInspector,
    rewriter: &'a dyn BinaryRewriter,
    policy: &'a dyn PolicyEngine,
    cache: &'a ScanCache,
    progress: &'a dyn ProgressReporter,
    config: BundleConfig,
}

/// Everything needed to install one binary into the tree.
struct InstallStep {
    source: PathBuf,
    dest_rel: PathBuf,
    plan: RewritePlan,
    reason: String,
    is_executable: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        inspector: &'a dyn BinaryInspector,
        rewriter: &'a dyn BinaryRewriter,
        policy: &'a dyn PolicyEngine,
        cache: &'a ScanCache,
        progress: &'a dyn ProgressReporter,
        config: BundleConfig,
    ) -> Self {
        Self { inspector, rewriter, policy, cache, progress, config }
    }

    /// Closure computation only, without touching the distribution tree.
    pub fn scan(&self, entry_points: &[Artifact]) -> Result<ClosureResult> {
        let walker =
            ClosureWalker::new(self.inspector, self.policy, self.cache, self.config.walk.clone());
        walker.walk_parallel(entry_points)
    }

    /// Full run: resolve, filter, copy, rewrite, and return the manifest.
    ///
    /// The manifest is only finalized after the whole closure resolved
    /// without unresolved or forbidden findings; no partial distribution is
    /// produced on a fatal error.
    pub fn run(&self, entry_points: &[Artifact]) -> Result<Manifest> {
        let span = info_span!("bundle", dist = %self.config.dist_dir.display());
        let _guard = span.enter();

        self.progress.event(&ProgressEvent::ScanStarted { entry_points: entry_points.len() });
        let closure = self.scan(entry_points)?;
        self.progress.event(&ProgressEvent::ClosureResolved {
            libraries: closure.entries.len(),
            excluded: closure.excluded.len(),
            scanned: closure.scanned,
        });

        let steps = self.plan_installs(entry_points, &closure)?;

        let mut manifest = Manifest::default();
        for step in &steps {
            let dest = self.config.dist_dir.join(&step.dest_rel);
            // Unchanged files that need no patching are left alone so
            // re-running over a populated tree is cheap and consistent.
            let up_to_date =
                step.plan.is_empty() && dest.exists() && files_identical(&step.source, &dest);
            if !up_to_date {
                install(&step.source, &dest, &step.plan, self.rewriter)?;
                self.progress.event(&ProgressEvent::Installed {
                    source: step.source.clone(),
                    destination: dest.clone(),
                });
            }

            if step.is_executable && self.config.platform == Platform::Windows {
                let exe_name = step.dest_rel.to_string_lossy().to_string();
                let launcher =
                    write_launcher(&self.config.dist_dir, &exe_name, &self.config.lib_dir)?;
                self.progress.event(&ProgressEvent::LauncherWritten { path: launcher });
            }

            manifest.entries.push(ManifestEntry {
                source: step.source.clone(),
                destination: step.dest_rel.clone(),
                reason: step.reason.clone(),
                sha256: sha256_file(&dest).ok(),
            });
        }

        manifest.excluded = closure.excluded.clone();
        manifest.finished_at = Some(chrono::Utc::now().to_rfc3339());
        self.progress.event(&ProgressEvent::Finished { entries: manifest.entries.len() });
        Ok(manifest)
    }

    /// Decide destinations and rewrite plans for every binary to install:
    /// the entry points themselves, then each bundled library in discovery
    /// order. Destinations are flat (basename under root or the library
    /// subdirectory); a basename collision between different sources is an
    /// internal-consistency error.
    fn plan_installs(
        &self,
        entry_points: &[Artifact],
        closure: &ClosureResult,
    ) -> Result<Vec<InstallStep>> {
        let lib_dir = PathBuf::from(&self.config.lib_dir);

        // First pass: destinations, first decision wins.
        let mut destinations = DestinationMap::default();

        let mut entry_sources = Vec::new();
        for artifact in entry_points {
            let canonical = std::fs::canonicalize(&artifact.path)?;
            let name = file_name_of(&canonical);
            destinations.assign(&canonical, PathBuf::from(&name))?;
            entry_sources.push((canonical, artifact.clone()));
        }
        for entry in &closure.entries {
            if destinations.by_source.contains_key(&entry.source) {
                // Already placed as an entry point.
                continue;
            }
            let name = file_name_of(&entry.source);
            destinations.assign(&entry.source, lib_dir.join(&name))?;
        }
        let dest_by_source = destinations.by_source;

        // Second pass: rewrite plans against the final layout.
        let mut steps = Vec::new();
        for (canonical, artifact) in &entry_sources {
            let dest_rel = dest_by_source[canonical].clone();
            let plan = self.rewrite_plan(canonical, &dest_rel, closure, &dest_by_source, false);
            steps.push(InstallStep {
                source: canonical.clone(),
                dest_rel,
                plan,
                reason: "entry point".to_string(),
                is_executable: artifact.role == ArtifactRole::Executable,
            });
        }
        for entry in &closure.entries {
            if entry_sources.iter().any(|(c, _)| c == &entry.source) {
                continue;
            }
            let dest_rel = dest_by_source[&entry.source].clone();
            let plan =
                self.rewrite_plan(&entry.source, &dest_rel, closure, &dest_by_source, true);
            steps.push(InstallStep {
                source: entry.source.clone(),
                dest_rel,
                plan,
                reason: format!(
                    "needed by {}",
                    entry.first_referencer().artifact.display()
                ),
                is_executable: false,
            });
        }

        Ok(steps)
    }

    /// Plan the reference updates for one binary given where everything
    /// lands in the final tree.
    fn rewrite_plan(
        &self,
        source: &Path,
        dest_rel: &Path,
        closure: &ClosureResult,
        dest_by_source: &HashMap<PathBuf, PathBuf>,
        is_bundled_library: bool,
    ) -> RewritePlan {
        let own_dir = dest_rel.parent().unwrap_or(Path::new("")).to_path_buf();
        let mut plan = RewritePlan::default();
        let mut references_bundled = false;

        for entry in &closure.entries {
            let Some(old) = entry.reference_from(source) else { continue };
            let Some(lib_dest) = dest_by_source.get(&entry.source) else { continue };
            references_bundled = true;
            let rel = relative_from(&own_dir, lib_dest);
            let rel_str = path_to_slash(&rel);

            match self.config.platform {
                Platform::Linux => {
                    // RUNPATH covers bare names; only path-like references
                    // need their NEEDED entry renamed.
                    if old.contains('/') {
                        plan.changes.push(ReferenceChange {
                            old: old.to_string(),
                            new: file_name_of(lib_dest),
                        });
                    }
                }
                Platform::MacOs => {
                    let new = if is_bundled_library {
                        format!("@loader_path/{rel_str}")
                    } else {
                        format!("@executable_path/{rel_str}")
                    };
                    if old != new {
                        plan.changes.push(ReferenceChange { old: old.to_string(), new });
                    }
                }
                Platform::Windows => {
                    // The loader finds DLLs through the launcher's PATH.
                }
            }
        }

        if references_bundled {
            match self.config.platform {
                Platform::Linux => {
                    plan.rpath = Some(origin_rpath(&own_dir, &PathBuf::from(&self.config.lib_dir)));
                }
                Platform::MacOs => {
                    if !is_bundled_library {
                        let rel = relative_from(&own_dir, &PathBuf::from(&self.config.lib_dir));
                        let rel_str = path_to_slash(&rel);
                        plan.rpath = Some(if rel_str.is_empty() {
                            "@executable_path".to_string()
                        } else {
                            format!("@executable_path/{rel_str}")
                        });
                    }
                }
                Platform::Windows => {}
            }
        }

        if is_bundled_library && self.config.platform == Platform::MacOs {
            plan.install_name = Some(format!("@loader_path/{}", file_name_of(dest_rel)));
        }

        plan
    }
}

/// Source → destination assignments with the uniqueness invariant: no two
/// sources may share a destination, and a source's first destination wins.
#[derive(Default)]
struct DestinationMap {
    by_source: HashMap<PathBuf, PathBuf>,
    by_dest: HashMap<PathBuf, PathBuf>,
}

impl DestinationMap {
    fn assign(&mut self, source: &Path, dest_rel: PathBuf) -> Result<()> {
        if let Some(existing) = self.by_source.get(source) {
            if *existing != dest_rel {
                return Err(Error::DestinationConflict {
                    destination: dest_rel,
                    existing_source: source.to_path_buf(),
                    new_source: source.to_path_buf(),
                });
            }
            return Ok(());
        }
        if let Some(other) = self.by_dest.get(&dest_rel) {
            return Err(Error::DestinationConflict {
                destination: dest_rel,
                existing_source: other.clone(),
                new_source: source.to_path_buf(),
            });
        }
        self.by_source.insert(source.to_path_buf(), dest_rel.clone());
        self.by_dest.insert(dest_rel, source.to_path_buf());
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// Relative path from `from_dir` to `to`, both relative to the same root.
fn relative_from(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from_dir.components().collect();
    let to_parts: Vec<Component> = to.components().collect();

    let common = from
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part);
    }
    rel
}

fn path_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `$ORIGIN`-relative RUNPATH from a binary's directory to the library dir.
fn origin_rpath(own_dir: &Path, lib_dir: &Path) -> String {
    let rel = relative_from(own_dir, lib_dir);
    let rel_str = path_to_slash(&rel);
    if rel_str.is_empty() {
        "$ORIGIN".to_string()
    } else {
        format!("$ORIGIN/{rel_str}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_between_tree_levels() {
        assert_eq!(relative_from(Path::new(""), Path::new("lib/libx.so")), PathBuf::from("lib/libx.so"));
        assert_eq!(relative_from(Path::new("lib"), Path::new("lib/libx.so")), PathBuf::from("libx.so"));
        assert_eq!(relative_from(Path::new("lib"), Path::new("libx.so")), PathBuf::from("../libx.so"));
    }

    #[test]
    fn origin_rpath_values() {
        assert_eq!(origin_rpath(Path::new(""), Path::new("")), "$ORIGIN");
        assert_eq!(origin_rpath(Path::new(""), Path::new("lib")), "$ORIGIN/lib");
        assert_eq!(origin_rpath(Path::new("lib"), Path::new("lib")), "$ORIGIN");
    }
}
