//! End-to-end coverage against real ELF binaries built with rustc.
//!
//! The chain mirrors a typical vendored layout: `app` links `libfoo.so`
//! (reachable through RPATH `$ORIGIN/libs`), and `libfoo.so` links
//! `libbar.so.2`, which only a policy-supplied vendor directory can resolve.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use bundle_core::cache::ScanCache;
use bundle_core::closure::{ClosureWalker, WalkConfig};
use bundle_core::inspect::{BinaryInspector, ElfInspector};
use bundle_core::model::{Artifact, ArtifactRole, Platform};
use bundle_core::orchestrate::{BundleConfig, Orchestrator, SilentProgress};
use bundle_core::policy::{Decision, DefaultPolicy, PolicyEngine};
use bundle_core::rewrite::ElfRewriter;

struct VendorPolicy {
    vendor: PathBuf,
    default: DefaultPolicy,
}

impl PolicyEngine for VendorPolicy {
    fn decide(&self, library: &str, consumer: &Artifact) -> Decision {
        self.default.decide(library, consumer)
    }

    fn extra_search_dirs(&self, _consumer: &Artifact) -> Vec<PathBuf> {
        vec![self.vendor.clone()]
    }
}

fn rustc(args: &[&str], cwd: &Path) {
    let status = Command::new("rustc")
        .args(args)
        .current_dir(cwd)
        .status()
        .expect("rustc spawn");
    assert!(status.success(), "rustc failed: rustc {}", args.join(" "));
}

fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Build the app -> libfoo -> libbar chain under `root`.
///
/// Layout: `root/app`, `root/libs/libfoo.so`, `root/vendor/libbar.so.2`.
fn build_chain(root: &Path) {
    let build = root.join("build");
    fs::create_dir_all(&build).unwrap();
    fs::create_dir_all(root.join("libs")).unwrap();
    fs::create_dir_all(root.join("vendor")).unwrap();

    fs::write(
        build.join("bar.rs"),
        r#"#[no_mangle] pub extern "C" fn bar_value() -> i32 { 7 }"#,
    )
    .unwrap();
    rustc(
        &[
            "--crate-type=cdylib",
            "-C", "link-arg=-Wl,-soname,libbar.so.2",
            "-o", "libbar.so",
            "bar.rs",
        ],
        &build,
    );
    // The runtime file carries the versioned name; the unversioned copy
    // stays behind for the link steps below.
    fs::copy(build.join("libbar.so"), root.join("vendor/libbar.so.2")).unwrap();

    fs::write(
        build.join("foo.rs"),
        r#"
        #[link(name = "bar")]
        extern "C" { fn bar_value() -> i32; }
        #[no_mangle] pub extern "C" fn foo_value() -> i32 { unsafe { bar_value() } + 1 }
        "#,
    )
    .unwrap();
    rustc(
        &[
            "--crate-type=cdylib",
            "-L", "native=.",
            "-C", "link-arg=-Wl,-soname,libfoo.so",
            "-o", "../libs/libfoo.so",
            "foo.rs",
        ],
        &build,
    );

    fs::write(
        build.join("app.rs"),
        r#"
        #[link(name = "foo")]
        extern "C" { fn foo_value() -> i32; }
        fn main() { println!("{}", unsafe { foo_value() }); }
        "#,
    )
    .unwrap();
    rustc(
        &[
            "-L", "native=../libs",
            "-L", "native=.",
            // ld resolves libfoo's own NEEDED entry (libbar.so.2) through
            // rpath-link; only the vendor copy carries the versioned name.
            "-C", "link-arg=-Wl,-rpath-link,../vendor",
            "-C", "link-arg=-Wl,-rpath,$ORIGIN/libs",
            "-o", "../app",
            "app.rs",
        ],
        &build,
    );
}

#[test]
fn inspector_reads_needed_and_rpath_from_real_binaries() {
    let temp = tempfile::tempdir().unwrap();
    build_chain(temp.path());

    let app = ElfInspector.inspect(&temp.path().join("app")).unwrap();
    assert!(app.references.iter().any(|r| r == "libfoo.so"), "references: {:?}", app.references);
    assert!(
        app.search_hints.iter().any(|h| h.contains("$ORIGIN/libs")),
        "hints: {:?}",
        app.search_hints
    );

    let foo = ElfInspector.inspect(&temp.path().join("libs/libfoo.so")).unwrap();
    assert!(foo.references.iter().any(|r| r == "libbar.so.2"), "references: {:?}", foo.references);
    assert_eq!(foo.install_name.as_deref(), Some("libfoo.so"));
}

#[test]
fn closure_walk_finds_the_whole_chain() {
    let temp = tempfile::tempdir().unwrap();
    build_chain(temp.path());

    let inspector = ElfInspector;
    let policy = VendorPolicy {
        vendor: temp.path().join("vendor"),
        default: DefaultPolicy::new(Platform::Linux),
    };
    let cache = ScanCache::in_memory();
    let walker = ClosureWalker::new(&inspector, &policy, &cache, WalkConfig::default());

    let app = Artifact::entry(temp.path().join("app"), ArtifactRole::Executable);
    let result = walker.walk(&[app]).unwrap();

    let names: Vec<String> = result
        .entries
        .iter()
        .map(|e| e.source.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert!(names.contains(&"libfoo.so".to_string()), "closure: {names:?}");
    assert!(names.contains(&"libbar.so.2".to_string()), "closure: {names:?}");
    // libc and friends stay with the OS.
    assert!(result.excluded.iter().any(|e| e.library.starts_with("libc.so")));
    assert!(!names.iter().any(|n| n.starts_with("libc.so")));
}

#[test]
fn bundle_run_relocates_the_chain_with_patchelf() {
    if !tool_available("patchelf") {
        eprintln!("patchelf not installed; skipping rewrite end-to-end test");
        return;
    }

    let temp = tempfile::tempdir().unwrap();
    build_chain(temp.path());

    let inspector = ElfInspector;
    let policy = VendorPolicy {
        vendor: temp.path().join("vendor"),
        default: DefaultPolicy::new(Platform::Linux),
    };
    let cache = ScanCache::in_memory();
    let rewriter = ElfRewriter::default();
    let dist = temp.path().join("dist");
    let config = BundleConfig::new(&dist, Platform::Linux);
    let orchestrator =
        Orchestrator::new(&inspector, &rewriter, &policy, &cache, &SilentProgress, config);

    let app = Artifact::entry(temp.path().join("app"), ArtifactRole::Executable);
    let manifest = orchestrator.run(&[app]).unwrap();

    let dests: Vec<&str> =
        manifest.entries.iter().map(|e| e.destination.to_str().unwrap()).collect();
    assert_eq!(dests, vec!["app", "libfoo.so", "libbar.so.2"]);

    // The copies carry the relocatable RUNPATH; the originals are untouched.
    let rewritten = ElfInspector.inspect(&dist.join("app")).unwrap();
    assert!(
        rewritten.search_hints.iter().any(|h| h == "$ORIGIN"),
        "hints after rewrite: {:?}",
        rewritten.search_hints
    );
    let original = ElfInspector.inspect(&temp.path().join("app")).unwrap();
    assert!(original.search_hints.iter().any(|h| h.contains("$ORIGIN/libs")));

    // The relocated tree must actually run, loading only bundled copies.
    let output = Command::new(dist.join("app")).output().expect("run bundled app");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "8");
}
