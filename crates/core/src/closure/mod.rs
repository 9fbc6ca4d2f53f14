//! Transitive dependency closure computation.
//!
//! Starting from the entry-point artifacts, repeatedly inspect, resolve, and
//! enqueue newly discovered libraries. A visited set keyed by canonical path
//! guarantees termination on cyclic graphs and gives single-flight semantics:
//! every binary is scanned at most once per run no matter how many artifacts
//! reference it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info};

use crate::cache::{CachedScan, Fingerprint, ResolvedRecord, ScanCache};
use crate::error::{Error, Result};
use crate::inspect::{BinaryInspector, Inspection};
use crate::model::{Artifact, ArtifactRole, ClosureEntry, ExclusionRecord};
use crate::policy::{Decision, PolicyEngine};
use crate::resolve::{Resolution, Resolver, SearchContext};

/// Tunables for one closure computation.
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Toolchain identity string folded into cache fingerprints.
    pub toolchain_tag: String,
    /// Global fallback search directories, lowest priority.
    pub fallback_dirs: Vec<PathBuf>,
    /// Scan worker count; 0 derives from available CPU parallelism.
    pub workers: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self { toolchain_tag: String::new(), fallback_dirs: Vec::new(), workers: 0 }
    }
}

impl WalkConfig {
    fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(8)
    }
}

/// Output of a closure computation, in deterministic discovery order.
#[derive(Debug, Clone, Default)]
pub struct ClosureResult {
    pub entries: Vec<ClosureEntry>,
    pub excluded: Vec<ExclusionRecord>,
    /// Number of distinct binaries processed (cache hits included).
    pub scanned: usize,
}

/// One artifact awaiting a scan, with the context it inherits from the chain
/// of artifacts that pulled it in.
#[derive(Debug, Clone)]
struct PendingItem {
    artifact: Artifact,
    /// Search directories inherited from ancestors (classic DT_RPATH flow).
    inherited: Vec<PathBuf>,
    /// Directory of the rooting executable, for `@executable_path`.
    exe_dir: Option<PathBuf>,
}

impl PendingItem {
    fn entry(artifact: &Artifact) -> Self {
        let exe_dir = match artifact.role {
            ArtifactRole::Executable => Some(artifact.dir()),
            _ => None,
        };
        Self { artifact: artifact.clone(), inherited: Vec::new(), exe_dir }
    }
}

#[derive(Default)]
struct WalkState {
    visited: HashSet<PathBuf>,
    entries: Vec<ClosureEntry>,
    index: HashMap<PathBuf, usize>,
    excluded: Vec<ExclusionRecord>,
    excluded_seen: HashSet<String>,
    scanned: usize,
}

impl WalkState {
    /// Returns true when `source` is new to the closure.
    fn merge_entry(&mut self, source: &Path, referencer: &Path, reference: &str) -> bool {
        if let Some(&idx) = self.index.get(source) {
            self.entries[idx].add_referencer(referencer, reference);
            false
        } else {
            self.index.insert(source.to_path_buf(), self.entries.len());
            self.entries.push(ClosureEntry::new(source, referencer, reference));
            true
        }
    }

    fn record_exclusion(&mut self, library: &str, rule: &str, consumer: &Path) {
        if self.excluded_seen.insert(library.to_string()) {
            self.excluded.push(ExclusionRecord {
                library: library.to_string(),
                rule: rule.to_string(),
                consumer: consumer.to_path_buf(),
            });
        }
    }

    fn into_result(self) -> ClosureResult {
        ClosureResult { entries: self.entries, excluded: self.excluded, scanned: self.scanned }
    }
}

/// Closure walker over injected inspector, policy, and cache.
pub struct ClosureWalker<'a> {
    inspector: &'a dyn BinaryInspector,
    resolver: Resolver,
    policy: &'a dyn PolicyEngine,
    cache: &'a ScanCache,
    config: WalkConfig,
}

impl<'a> ClosureWalker<'a> {
    pub fn new(
        inspector: &'a dyn BinaryInspector,
        policy: &'a dyn PolicyEngine,
        cache: &'a ScanCache,
        config: WalkConfig,
    ) -> Self {
        let resolver = Resolver::new(inspector.format());
        Self { inspector, resolver, policy, cache, config }
    }

    /// Sequential walk: the reference semantics all other modes must match.
    pub fn walk(&self, entry_points: &[Artifact]) -> Result<ClosureResult> {
        let mut state = WalkState::default();
        let mut pending: VecDeque<PendingItem> =
            entry_points.iter().map(PendingItem::entry).collect();

        while let Some(item) = pending.pop_front() {
            let Some(canonical) = self.admit(&mut state, &item)? else { continue };
            let fingerprint = self.fingerprint(&item, &canonical)?;

            let cached = self.valid_cache_hit(&fingerprint);
            let scan = match &cached {
                Some(hit) => CachedScan::clone(hit),
                None => {
                    let inspection = self.inspector.inspect(&canonical)?;
                    CachedScan { inspection, resolved: Vec::new() }
                }
            };

            state.scanned += 1;
            let (discovered, resolved) = self.integrate(&mut state, &item, &canonical, &scan)?;
            if cached.is_none() {
                self.cache
                    .put(&fingerprint, CachedScan { inspection: scan.inspection, resolved });
            }
            pending.extend(discovered);
        }

        Ok(state.into_result())
    }

    /// Parallel walk: a bounded worker pool runs the I/O-bound inspections
    /// while a single coordinator owns the visited set, resolution, policy,
    /// and merging. Results are integrated in dispatch order, so the output
    /// is identical to [`walk`].
    pub fn walk_parallel(&self, entry_points: &[Artifact]) -> Result<ClosureResult> {
        let workers = self.config.effective_workers();
        if workers <= 1 {
            return self.walk(entry_points);
        }

        type ScanReply = (PathBuf, Result<Inspection>);
        let (job_tx, job_rx) = unbounded::<PathBuf>();
        let (result_tx, result_rx) = unbounded::<ScanReply>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx: Receiver<PathBuf> = job_rx.clone();
                let result_tx: Sender<ScanReply> = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(path) = job_rx.recv() {
                        let inspection = self.inspector.inspect(&path);
                        if result_tx.send((path, inspection)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let outcome = self.coordinate(entry_points, &job_tx, &result_rx);
            // Closing the job channel lets the workers drain and exit before
            // the scope joins them.
            drop(job_tx);
            outcome
        })
    }

    fn coordinate(
        &self,
        entry_points: &[Artifact],
        job_tx: &Sender<PathBuf>,
        result_rx: &Receiver<(PathBuf, Result<Inspection>)>,
    ) -> Result<ClosureResult> {
        let mut state = WalkState::default();
        let mut pending: VecDeque<PendingItem> =
            entry_points.iter().map(PendingItem::entry).collect();
        // Dispatch-order FIFO: results are integrated strictly in the order
        // jobs were issued, which keeps discovery order deterministic.
        let mut dispatched: VecDeque<(PendingItem, PathBuf, Fingerprint)> = VecDeque::new();
        let mut arrived: HashMap<PathBuf, Result<Inspection>> = HashMap::new();

        loop {
            while let Some(item) = pending.pop_front() {
                let Some(canonical) = self.admit(&mut state, &item)? else { continue };
                let fingerprint = self.fingerprint(&item, &canonical)?;
                if let Some(hit) = self.valid_cache_hit(&fingerprint) {
                    state.scanned += 1;
                    let (discovered, _) = self.integrate(&mut state, &item, &canonical, &hit)?;
                    pending.extend(discovered);
                    continue;
                }
                job_tx.send(canonical.clone()).expect("scan workers alive while coordinator runs");
                dispatched.push_back((item, canonical, fingerprint));
            }

            let Some((item, canonical, fingerprint)) = dispatched.pop_front() else {
                break;
            };
            let inspection = self.await_reply(&canonical, result_rx, &mut arrived)?;

            state.scanned += 1;
            let scan = CachedScan { inspection, resolved: Vec::new() };
            let (discovered, resolved) = self.integrate(&mut state, &item, &canonical, &scan)?;
            self.cache.put(&fingerprint, CachedScan { inspection: scan.inspection, resolved });
            pending.extend(discovered);
        }

        Ok(state.into_result())
    }

    /// Block until the worker reply for `canonical` arrives, parking replies
    /// for other binaries until their turn in the dispatch FIFO.
    fn await_reply(
        &self,
        canonical: &Path,
        result_rx: &Receiver<(PathBuf, Result<Inspection>)>,
        arrived: &mut HashMap<PathBuf, Result<Inspection>>,
    ) -> Result<Inspection> {
        loop {
            if let Some(found) = arrived.remove(canonical) {
                return found;
            }
            let (path, result) =
                result_rx.recv().expect("scan workers alive while results outstanding");
            arrived.insert(path, result);
        }
    }

    /// Canonicalize and claim an artifact; `None` when already visited.
    fn admit(&self, state: &mut WalkState, item: &PendingItem) -> Result<Option<PathBuf>> {
        let canonical = std::fs::canonicalize(&item.artifact.path)?;
        if !state.visited.insert(canonical.clone()) {
            return Ok(None);
        }
        debug!(artifact = %canonical.display(), "scanning");
        Ok(Some(canonical))
    }

    fn fingerprint(&self, item: &PendingItem, canonical: &Path) -> Result<Fingerprint> {
        let extra = self.policy.extra_search_dirs(&item.artifact);
        Fingerprint::compute(canonical, &self.config.toolchain_tag, &extra)
    }

    /// Cache hit whose captured resolutions all still exist; stale records
    /// are dropped here.
    fn valid_cache_hit(&self, fingerprint: &Fingerprint) -> Option<std::sync::Arc<CachedScan>> {
        let hit = self.cache.get(fingerprint)?;
        if hit.is_valid() {
            Some(hit)
        } else {
            self.cache.invalidate(fingerprint);
            None
        }
    }

    /// Apply policy and resolution to one scanned artifact. Returns the newly
    /// discovered artifacts to enqueue and the resolved (reference, path)
    /// pairs for the cache record.
    fn integrate(
        &self,
        state: &mut WalkState,
        item: &PendingItem,
        canonical: &Path,
        scan: &CachedScan,
    ) -> Result<(Vec<PendingItem>, Vec<ResolvedRecord>)> {
        let inspection = &scan.inspection;
        let cached_paths: HashMap<&str, &PathBuf> =
            scan.resolved.iter().map(|r| (r.reference.as_str(), &r.path)).collect();

        let ctx = self.search_context(item, canonical, inspection);
        let mut discovered = Vec::new();
        let mut resolved_records = Vec::new();

        for reference in &inspection.references {
            // A library's embedded id naming itself is not a dependency.
            if inspection.install_name.as_deref() == Some(reference.as_str()) {
                continue;
            }

            match self.policy.decide(reference, &item.artifact) {
                Decision::Exclude { rule } => {
                    debug!(library = %reference, rule = %rule, "excluded by policy");
                    state.record_exclusion(reference, &rule, canonical);
                    continue;
                }
                Decision::Forbid { rule } => {
                    return Err(Error::Forbidden {
                        rule,
                        library: reference.clone(),
                        artifact: canonical.to_path_buf(),
                    });
                }
                Decision::Bundle => {}
            }

            let resolution = match cached_paths.get(reference.as_str()) {
                Some(path) if path.exists() => Resolution::Resolved((*path).clone()),
                _ => self.resolver.resolve(reference, &ctx),
            };

            match resolution {
                Resolution::Resolved(path) => {
                    resolved_records
                        .push(ResolvedRecord { reference: reference.clone(), path: path.clone() });
                    if state.merge_entry(&path, canonical, reference) {
                        let mut inherited = ctx.rpaths.clone();
                        inherited.extend(item.inherited.iter().cloned());
                        discovered.push(PendingItem {
                            artifact: Artifact::discovered(path, item.artifact.package.clone()),
                            inherited,
                            exe_dir: item.exe_dir.clone(),
                        });
                    }
                }
                Resolution::SelfReference => {
                    debug!(library = %reference, "self-reference skipped");
                }
                Resolution::Unresolved { searched } => {
                    return Err(Error::Unresolved {
                        artifact: canonical.to_path_buf(),
                        reference: reference.clone(),
                        searched,
                    });
                }
            }
        }

        info!(
            artifact = %canonical.display(),
            references = inspection.references.len(),
            discovered = discovered.len(),
            "resolved"
        );
        Ok((discovered, resolved_records))
    }

    fn search_context(
        &self,
        item: &PendingItem,
        canonical: &Path,
        inspection: &Inspection,
    ) -> SearchContext {
        let origin_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
        let exe_dir = item.exe_dir.as_deref();
        let rpaths = inspection
            .search_hints
            .iter()
            .map(|hint| SearchContext::expand_hint(hint, &origin_dir, exe_dir))
            .collect();

        SearchContext {
            referencer: canonical.to_path_buf(),
            rpaths,
            inherited: item.inherited.clone(),
            extra: self.policy.extra_search_dirs(&item.artifact),
            fallback: self.config.fallback_dirs.clone(),
            executable_dir: item.exe_dir.clone(),
        }
    }
}
