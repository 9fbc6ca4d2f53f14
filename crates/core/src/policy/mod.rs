//! Inclusion policy: which discovered libraries get bundled, which stay with
//! the operating system, and which abort the run outright.
//!
//! Decisions are pure functions of (library identity, consuming artifact) so
//! repeated runs over the same inputs are deterministic. Third-party policy
//! plugs in through the [`PolicyEngine`] trait; the built-in
//! [`DefaultPolicy`] carries the per-platform ignore lists of OS- and
//! runtime-owned libraries that must never ship in a distribution.

use std::path::PathBuf;

use crate::model::{Artifact, Platform};

/// Verdict for one (library, consumer) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Copy into the distribution and recurse into its dependencies.
    Bundle,
    /// Leave to the target OS; recorded in diagnostics, not an error.
    Exclude { rule: String },
    /// Abort the whole run; the named rule deliberately refuses this library.
    Forbid { rule: String },
}

/// Injected accept/reject callback plus per-package scan directories.
pub trait PolicyEngine: Send + Sync {
    /// Decide what happens to `library` as referenced by `consumer`.
    fn decide(&self, library: &str, consumer: &Artifact) -> Decision;

    /// Extra directories to search for `consumer`'s dependencies, highest
    /// priority first. Consulted after the artifact's own search hints.
    fn extra_search_dirs(&self, consumer: &Artifact) -> Vec<PathBuf>;
}

/// Library name prefixes owned by the Linux loader and C runtime. Matching
/// against prefixes covers version suffixes (`libm.so.6`, `libc.so.6`).
const LINUX_RUNTIME_PREFIXES: &[&str] = &[
    "ld-linux",
    "ld64.so",
    "libc.so",
    "libc.", // musl spelling, e.g. libc.musl-x86_64.so.1
    "libm.so",
    "libdl.so",
    "libpthread.so",
    "librt.so",
    "libutil.so",
    "libgcc_s.so",
    "libresolv.so",
    "linux-vdso",
];

/// macOS system-owned names; anything under /usr/lib or /System is also out.
const MACOS_RUNTIME_PREFIXES: &[&str] = &["libSystem", "libobjc", "libc++"];

/// DLLs assumed present on every supported Windows machine.
const WINDOWS_RUNTIME_NAMES: &[&str] = &[
    "kernel32.dll",
    "kernelbase.dll",
    "user32.dll",
    "gdi32.dll",
    "ntdll.dll",
    "advapi32.dll",
    "ws2_32.dll",
    "shell32.dll",
    "shlwapi.dll",
    "ole32.dll",
    "oleaut32.dll",
    "msvcrt.dll",
    "ucrtbase.dll",
    "version.dll",
    "winmm.dll",
    "crypt32.dll",
    "bcrypt.dll",
    "comdlg32.dll",
    "comctl32.dll",
    "rpcrt4.dll",
    "setupapi.dll",
    "userenv.dll",
    "secur32.dll",
];

const WINDOWS_RUNTIME_PREFIXES: &[&str] = &["api-ms-win-", "ext-ms-"];

/// Built-in policy: bundle everything except the platform runtime set.
pub struct DefaultPolicy {
    platform: Platform,
}

impl DefaultPolicy {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn is_runtime_owned(&self, library: &str) -> bool {
        let name = library.rsplit('/').next().unwrap_or(library);
        match self.platform {
            Platform::Linux => LINUX_RUNTIME_PREFIXES.iter().any(|p| name.starts_with(p)),
            Platform::MacOs => {
                library.starts_with("/usr/lib/")
                    || library.starts_with("/System/")
                    || MACOS_RUNTIME_PREFIXES.iter().any(|p| name.starts_with(p))
            }
            Platform::Windows => {
                let lower = name.to_ascii_lowercase();
                WINDOWS_RUNTIME_NAMES.contains(&lower.as_str())
                    || WINDOWS_RUNTIME_PREFIXES.iter().any(|p| lower.starts_with(p))
            }
        }
    }
}

impl PolicyEngine for DefaultPolicy {
    fn decide(&self, library: &str, _consumer: &Artifact) -> Decision {
        if self.is_runtime_owned(library) {
            Decision::Exclude { rule: rule_name(self.platform) }
        } else {
            Decision::Bundle
        }
    }

    fn extra_search_dirs(&self, _consumer: &Artifact) -> Vec<PathBuf> {
        Vec::new()
    }
}

fn rule_name(platform: Platform) -> String {
    match platform {
        Platform::Linux => "linux-runtime".to_string(),
        Platform::MacOs => "macos-runtime".to_string(),
        Platform::Windows => "windows-runtime".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactRole;

    fn consumer() -> Artifact {
        Artifact::entry("/src/app", ArtifactRole::Executable)
    }

    #[test]
    fn linux_loader_and_libc_are_excluded() {
        let policy = DefaultPolicy::new(Platform::Linux);
        for lib in ["libc.so.6", "ld-linux-x86-64.so.2", "libpthread.so.0", "libgcc_s.so.1"] {
            assert!(
                matches!(policy.decide(lib, &consumer()), Decision::Exclude { .. }),
                "{lib} should be excluded"
            );
        }
        assert_eq!(policy.decide("libssl.so.3", &consumer()), Decision::Bundle);
    }

    #[test]
    fn macos_system_paths_are_excluded() {
        let policy = DefaultPolicy::new(Platform::MacOs);
        assert!(matches!(
            policy.decide("/usr/lib/libSystem.B.dylib", &consumer()),
            Decision::Exclude { .. }
        ));
        assert!(matches!(
            policy.decide("/System/Library/Frameworks/CoreFoundation.framework/CoreFoundation", &consumer()),
            Decision::Exclude { .. }
        ));
        assert_eq!(policy.decide("@rpath/libvendored.dylib", &consumer()), Decision::Bundle);
    }

    #[test]
    fn windows_matching_is_case_insensitive() {
        let policy = DefaultPolicy::new(Platform::Windows);
        assert!(matches!(policy.decide("KERNEL32.dll", &consumer()), Decision::Exclude { .. }));
        assert!(matches!(
            policy.decide("api-ms-win-crt-runtime-l1-1-0.dll", &consumer()),
            Decision::Exclude { .. }
        ));
        assert_eq!(policy.decide("vendored.dll", &consumer()), Decision::Bundle);
    }

    #[test]
    fn decisions_are_pure() {
        let policy = DefaultPolicy::new(Platform::Linux);
        let first = policy.decide("libz.so.1", &consumer());
        let second = policy.decide("libz.so.1", &consumer());
        assert_eq!(first, second);
    }
}
