//! Persistent memoization of binary scans.
//!
//! One JSON record per fingerprint lives in a user- or project-scoped cache
//! directory, so repeated packaging runs skip re-parsing unchanged binaries.
//! Records are written whole to a temp sibling and renamed into place;
//! nothing is ever edited in place, so concurrent readers see either the old
//! record or the new one. Corrupt or unreadable records are a miss, never an
//! error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::inspect::Inspection;

/// Composite key for one scan of one binary under one environment.
///
/// Inputs: absolute path, mtime + size (content proxy), a toolchain identity
/// string, the policy-supplied extra search directories, and this crate's
/// version so upgrades invalidate stale caches wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(path: &Path, toolchain: &str, extra_dirs: &[PathBuf]) -> Result<Self> {
        let meta = fs::metadata(path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(mtime.to_le_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(toolchain.as_bytes());
        let mut dirs: Vec<&PathBuf> = extra_dirs.iter().collect();
        dirs.sort();
        for dir in dirs {
            hasher.update(dir.as_os_str().as_encoded_bytes());
            hasher.update([0u8]);
        }
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());

        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One previously resolved dependency of a scanned binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub reference: String,
    pub path: PathBuf,
}

/// Everything a scan learned about one binary: the raw inspection plus the
/// resolutions the previous run arrived at (an accelerator only; the walker
/// re-resolves anything missing from this list).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedScan {
    pub inspection: Inspection,
    pub resolved: Vec<ResolvedRecord>,
}

impl CachedScan {
    /// A record is only reusable while every resolution it captured still
    /// exists on disk; one missing file invalidates the whole record.
    pub fn is_valid(&self) -> bool {
        self.resolved.iter().all(|r| r.path.exists())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    created_at: String,
    #[serde(flatten)]
    scan: CachedScan,
}

/// Aggregate numbers for cache maintenance commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub records: usize,
    pub total_bytes: u64,
}

/// Scan cache: an in-memory index over a directory of keyed records.
///
/// The directory is the only persisted store this component writes; it is
/// shared by concurrent scan workers through the interior mutex.
pub struct ScanCache {
    dir: Option<PathBuf>,
    records: Mutex<HashMap<String, Arc<CachedScan>>>,
}

impl ScanCache {
    /// Cache backed by `dir` (created on first write).
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()), records: Mutex::new(HashMap::new()) }
    }

    /// Cache that lives only for this process. Used by tests and `--no-cache`.
    pub fn in_memory() -> Self {
        Self { dir: None, records: Mutex::new(HashMap::new()) }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedScan>> {
        if let Some(hit) = self.records.lock().unwrap().get(fingerprint.as_str()).cloned() {
            return Some(hit);
        }

        let record_path = self.record_path(fingerprint)?;
        let body = fs::read_to_string(&record_path).ok()?;
        match serde_json::from_str::<DiskRecord>(&body) {
            Ok(record) => {
                let scan = Arc::new(record.scan);
                self.records
                    .lock()
                    .unwrap()
                    .insert(fingerprint.as_str().to_string(), Arc::clone(&scan));
                Some(scan)
            }
            Err(e) => {
                // Corrupt record: drop it and treat as a miss.
                warn!(record = %record_path.display(), error = %e, "discarding corrupt cache record");
                let _ = fs::remove_file(&record_path);
                None
            }
        }
    }

    pub fn put(&self, fingerprint: &Fingerprint, scan: CachedScan) -> Arc<CachedScan> {
        let scan = Arc::new(scan);
        self.records
            .lock()
            .unwrap()
            .insert(fingerprint.as_str().to_string(), Arc::clone(&scan));

        if let Some(record_path) = self.record_path(fingerprint) {
            if let Err(e) = self.write_record(&record_path, &scan) {
                // Persistence is best-effort; the run proceeds on memory alone.
                warn!(record = %record_path.display(), error = %e, "failed to persist cache record");
            }
        }
        scan
    }

    /// Drop a record whose captured resolutions no longer hold.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.records.lock().unwrap().remove(fingerprint.as_str());
        if let Some(record_path) = self.record_path(fingerprint) {
            let _ = fs::remove_file(record_path);
        }
        debug!(fingerprint = fingerprint.as_str(), "invalidated cache record");
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Some(dir) = &self.dir else { return stats };
        let Ok(entries) = fs::read_dir(dir) else { return stats };
        for entry in entries.flatten() {
            if entry.path().extension().is_some_and(|e| e == "json") {
                stats.records += 1;
                stats.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        stats
    }

    /// Remove every persisted record. Returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        self.records.lock().unwrap().clear();
        let Some(dir) = &self.dir else { return Ok(0) };
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn record_path(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.json", fingerprint.as_str())))
    }

    fn write_record(&self, record_path: &Path, scan: &CachedScan) -> Result<()> {
        if let Some(parent) = record_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = DiskRecord {
            created_at: chrono::Utc::now().to_rfc3339(),
            scan: CachedScan::clone(scan),
        };
        let json = serde_json::to_string_pretty(&record)
            .expect("cache record serialization cannot fail");
        let tmp = record_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, record_path)?;
        Ok(())
    }
}
