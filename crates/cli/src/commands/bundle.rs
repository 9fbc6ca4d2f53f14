use std::path::PathBuf;

use anyhow::{Context, Result};
use bundle_core::cache::ScanCache;
use bundle_core::closure::WalkConfig;
use bundle_core::inspect::inspector_for;
use bundle_core::model::{Manifest, Platform};
use bundle_core::orchestrate::{BundleConfig, Orchestrator, ProgressEvent, ProgressReporter};
use bundle_core::policy::{DefaultPolicy, PolicyEngine};
use bundle_core::rewrite::rewriter_for;

use dist_bundler::{canonicalize_or_current, default_cache_dir, entry_artifact, parse_platform};

use crate::commands::policy::{FilePolicy, PolicyFile};

/// Options shared by the closure-computing commands.
pub struct RunOptions {
    pub entries: Vec<String>,
    pub policy: Option<String>,
    pub platform: Option<String>,
    pub cache_dir: Option<String>,
    pub no_cache: bool,
    pub workers: usize,
}

/// Collaborators assembled from CLI options.
pub struct RunSetup {
    pub platform: Platform,
    pub policy: Box<dyn PolicyEngine>,
    pub cache: ScanCache,
    pub walk: WalkConfig,
    pub artifacts: Vec<bundle_core::model::Artifact>,
}

impl RunOptions {
    pub fn setup(&self) -> Result<RunSetup> {
        let platform = parse_platform(self.platform.as_deref())?;

        let (policy, fallback_dirs): (Box<dyn PolicyEngine>, Vec<PathBuf>) = match &self.policy {
            Some(path) => {
                let file = PolicyFile::load(path)?;
                let policy = FilePolicy::new(file, platform);
                let fallback = policy.fallback_dirs();
                (Box::new(policy), fallback)
            }
            None => (Box::new(DefaultPolicy::new(platform)), Vec::new()),
        };

        let cache = if self.no_cache {
            ScanCache::in_memory()
        } else {
            match self.cache_dir.as_deref().map(PathBuf::from).or_else(default_cache_dir) {
                Some(dir) => ScanCache::persistent(dir),
                None => ScanCache::in_memory(),
            }
        };

        let walk = WalkConfig {
            toolchain_tag: format!("dist-bundler-{}", bundle_core::version()),
            fallback_dirs,
            workers: self.workers,
        };

        let artifacts = self
            .entries
            .iter()
            .map(|e| entry_artifact(e))
            .collect::<Result<Vec<_>>>()?;

        Ok(RunSetup { platform, policy, cache, walk, artifacts })
    }
}

/// Reporter printing one line per event to stdout.
pub struct PrintProgress;

impl ProgressReporter for PrintProgress {
    fn event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ScanStarted { entry_points } => {
                println!("Scanning {entry_points} entry point(s)...");
            }
            ProgressEvent::ClosureResolved { libraries, excluded, scanned } => {
                println!(
                    "Closure resolved: {libraries} librar(ies) to bundle, \
                     {excluded} excluded, {scanned} binaries scanned"
                );
            }
            ProgressEvent::Installed { source, destination } => {
                println!("  {} -> {}", source.display(), destination.display());
            }
            ProgressEvent::LauncherWritten { path } => {
                println!("  launcher {}", path.display());
            }
            ProgressEvent::Finished { entries } => {
                println!("Done: {entries} file(s) in the distribution manifest");
            }
        }
    }
}

pub fn bundle_command(
    options: &RunOptions,
    dist: &str,
    lib_dir: &str,
    json: bool,
) -> Result<()> {
    let setup = options.setup()?;
    let inspector = inspector_for(setup.platform);
    let rewriter = rewriter_for(setup.platform);

    let mut config = BundleConfig::new(canonicalize_or_current(dist)?, setup.platform);
    config.lib_dir = lib_dir.to_string();
    config.walk = setup.walk;

    let silent = bundle_core::orchestrate::SilentProgress;
    let printed = PrintProgress;
    let progress: &dyn ProgressReporter = if json { &silent } else { &printed };

    let orchestrator = Orchestrator::new(
        inspector.as_ref(),
        rewriter.as_ref(),
        setup.policy.as_ref(),
        &setup.cache,
        progress,
        config,
    );

    let manifest = orchestrator.run(&setup.artifacts).context("Packaging run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    } else {
        print_summary(&manifest);
    }
    Ok(())
}

fn print_summary(manifest: &Manifest) {
    for entry in &manifest.entries {
        println!("{} -> {} ({})", entry.source.display(), entry.destination.display(), entry.reason);
    }
    if !manifest.excluded.is_empty() {
        println!("Excluded (left to the OS):");
        for record in &manifest.excluded {
            println!("  {} [{}]", record.library, record.rule);
        }
    }
}
