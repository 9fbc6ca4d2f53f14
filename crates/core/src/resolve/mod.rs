//! Dependency reference resolution.
//!
//! Turns one raw reference (bare name, `$ORIGIN`-relative, `@rpath/...`,
//! absolute path) plus the referencing binary's search context into an
//! absolute, symlink-resolved path. Order is significant everywhere: the
//! first existing match wins.

use std::fs;
use std::path::{Path, PathBuf};

use crate::model::BinaryFormat;

/// Ordered candidate directories for one artifact's lookups.
///
/// Priority: the artifact's own directory, its declared RPATH/RUNPATH (or
/// `LC_RPATH`) entries, rpath entries inherited from the artifacts that
/// pulled it in, policy-supplied extra directories, then global fallbacks.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    /// Canonical path of the referencing binary.
    pub referencer: PathBuf,
    /// The referencing binary's own search hints, token-expanded, in
    /// declaration order.
    pub rpaths: Vec<PathBuf>,
    /// Search hints inherited down the discovery chain.
    pub inherited: Vec<PathBuf>,
    /// Policy-supplied directories for the owning package.
    pub extra: Vec<PathBuf>,
    /// Global fallback directories (install prefix, redistributable runtimes).
    pub fallback: Vec<PathBuf>,
    /// Directory of the entry-point executable, for `@executable_path`.
    pub executable_dir: Option<PathBuf>,
}

impl SearchContext {
    pub fn origin_dir(&self) -> PathBuf {
        self.referencer.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Expand one raw search hint against this context.
    pub fn expand_hint(hint: &str, origin_dir: &Path, executable_dir: Option<&Path>) -> PathBuf {
        let expanded = if let Some(rest) = hint.strip_prefix("$ORIGIN") {
            join_token(origin_dir, rest)
        } else if let Some(rest) = hint.strip_prefix("${ORIGIN}") {
            join_token(origin_dir, rest)
        } else if let Some(rest) = hint.strip_prefix("@loader_path") {
            join_token(origin_dir, rest)
        } else if let Some(rest) = hint.strip_prefix("@executable_path") {
            join_token(executable_dir.unwrap_or(origin_dir), rest)
        } else {
            PathBuf::from(hint)
        };
        expanded
    }

    /// Directories searched for a bare name, in tie-break order.
    fn bare_search_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for dir in self
            .rpaths
            .iter()
            .chain(self.inherited.iter())
            .chain(self.extra.iter())
            .chain(self.fallback.iter())
        {
            dirs.push(dir.as_path());
        }
        dirs
    }
}

fn join_token(base: &Path, rest: &str) -> PathBuf {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Absolute, normalized, symlink-resolved path.
    Resolved(PathBuf),
    /// The reference points back at the referencing binary itself (embedded
    /// install name); excluded from the closure.
    SelfReference,
    /// No candidate existed; `searched` lists every directory tried in order.
    Unresolved { searched: Vec<PathBuf> },
}

/// Platform-aware reference resolver. Pure aside from filesystem probes.
pub struct Resolver {
    format: BinaryFormat,
}

impl Resolver {
    pub fn new(format: BinaryFormat) -> Self {
        Self { format }
    }

    pub fn resolve(&self, reference: &str, ctx: &SearchContext) -> Resolution {
        let mut searched = Vec::new();
        let origin = ctx.origin_dir();

        // 1. Absolute references are used as-is when they exist.
        let ref_path = Path::new(reference);
        if ref_path.is_absolute() {
            if let Some(found) = self.finish(ref_path, ctx) {
                return found;
            }
            if let Some(parent) = ref_path.parent() {
                searched.push(parent.to_path_buf());
            }
            // Fall through: look the basename up along the search order. An
            // embedded absolute path from the build machine frequently does
            // not exist on the packaging machine.
        }

        // 2. Symbolic prefixes substitute against the referencing binary.
        if let Some(rest) = reference.strip_prefix("@rpath/") {
            for dir in ctx.rpaths.iter().chain(ctx.inherited.iter()) {
                let candidate = dir.join(rest);
                if let Some(found) = self.finish(&candidate, ctx) {
                    return found;
                }
                searched.push(dir.clone());
            }
            // Loader semantics also try the loading binary's directory.
            if let Some(found) = self.finish(&origin.join(rest), ctx) {
                return found;
            }
            searched.push(origin.clone());
            return self.with_heuristics(rest, ctx, searched);
        }
        if let Some(rest) = reference.strip_prefix("@loader_path/") {
            if let Some(found) = self.finish(&origin.join(rest), ctx) {
                return found;
            }
            searched.push(origin);
            return Resolution::Unresolved { searched };
        }
        if let Some(rest) = reference.strip_prefix("@executable_path/") {
            let exe_dir = ctx.executable_dir.clone().unwrap_or(origin);
            if let Some(found) = self.finish(&exe_dir.join(rest), ctx) {
                return found;
            }
            searched.push(exe_dir);
            return Resolution::Unresolved { searched };
        }
        if reference.contains("$ORIGIN") || reference.contains("${ORIGIN}") {
            let candidate = SearchContext::expand_hint(reference, &origin, ctx.executable_dir.as_deref());
            if let Some(found) = self.finish(&candidate, ctx) {
                return found;
            }
            if let Some(parent) = candidate.parent() {
                searched.push(parent.to_path_buf());
            }
            return Resolution::Unresolved { searched };
        }

        // 3. Bare name (or embedded relative path): ordered directory search,
        // starting with the referencing binary's own directory.
        let name = bare_name(reference);
        let candidate = origin.join(reference);
        if let Some(found) = self.finish(&candidate, ctx) {
            return found;
        }
        searched.push(origin.clone());
        for dir in ctx.bare_search_dirs() {
            if let Some(found) = self.finish(&dir.join(name), ctx) {
                return found;
            }
            searched.push(dir.to_path_buf());
        }

        self.with_heuristics(name, ctx, searched)
    }

    /// Last-resort retries: flip version suffixes in both directions and,
    /// for DLL names, retry case-insensitively.
    fn with_heuristics(&self, name: &str, ctx: &SearchContext, searched: Vec<PathBuf>) -> Resolution {
        let origin = ctx.origin_dir();
        let mut dirs: Vec<PathBuf> = vec![origin];
        dirs.extend(ctx.bare_search_dirs().iter().map(|d| d.to_path_buf()));

        match self.format {
            BinaryFormat::Elf => {
                // Versioned reference, unversioned file present.
                if let Some(unversioned) = strip_so_version(name) {
                    for dir in &dirs {
                        if let Some(found) = self.finish(&dir.join(&unversioned), ctx) {
                            return found;
                        }
                    }
                }
                // Unversioned reference, only a versioned file present.
                if name.ends_with(".so") {
                    for dir in &dirs {
                        if let Some(hit) = first_entry_with_prefix(dir, &format!("{name}.")) {
                            if let Some(found) = self.finish(&hit, ctx) {
                                return found;
                            }
                        }
                    }
                }
            }
            BinaryFormat::MachO => {
                if let Some(unversioned) = strip_dylib_version(name) {
                    for dir in &dirs {
                        if let Some(found) = self.finish(&dir.join(&unversioned), ctx) {
                            return found;
                        }
                    }
                }
                if let Some(stem) = name.strip_suffix(".dylib") {
                    for dir in &dirs {
                        if let Some(hit) =
                            first_versioned_dylib(dir, stem)
                        {
                            if let Some(found) = self.finish(&hit, ctx) {
                                return found;
                            }
                        }
                    }
                }
            }
            BinaryFormat::Pe => {
                // Import names are case-insensitive on Windows; cross-builds
                // hit this when the on-disk file differs in case.
                for dir in &dirs {
                    if let Some(hit) = find_case_insensitive(dir, name) {
                        if let Some(found) = self.finish(&hit, ctx) {
                            return found;
                        }
                    }
                }
            }
        }

        Resolution::Unresolved { searched }
    }

    /// Normalize an existing candidate and screen out self-references.
    fn finish(&self, candidate: &Path, ctx: &SearchContext) -> Option<Resolution> {
        if !candidate.exists() {
            return None;
        }
        let real = fs::canonicalize(candidate).ok()?;
        if real == ctx.referencer {
            return Some(Resolution::SelfReference);
        }
        Some(Resolution::Resolved(real))
    }
}

/// Final path component of a possibly path-like reference.
fn bare_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// `libfoo.so.3.1` -> `libfoo.so`; `None` when there is no numeric suffix.
fn strip_so_version(name: &str) -> Option<String> {
    let idx = name.find(".so.")?;
    let suffix = &name[idx + 4..];
    if !suffix.is_empty() && suffix.split('.').all(|part| part.chars().all(|c| c.is_ascii_digit())) {
        Some(format!("{}.so", &name[..idx]))
    } else {
        None
    }
}

/// `libfoo.3.dylib` -> `libfoo.dylib`; `None` when there is no version part.
fn strip_dylib_version(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".dylib")?;
    let (base, version) = stem.rsplit_once('.')?;
    if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{base}.dylib"))
    } else {
        None
    }
}

/// First directory entry (sorted, for determinism) whose name starts with
/// `prefix` and continues with a numeric version.
fn first_entry_with_prefix(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| {
            n.strip_prefix(prefix)
                .is_some_and(|rest| rest.split('.').all(|p| p.chars().all(|c| c.is_ascii_digit())))
        })
        .collect();
    names.sort();
    names.first().map(|n| dir.join(n))
}

/// First `{stem}.<version>.dylib` in `dir`, sorted for determinism.
fn first_versioned_dylib(dir: &Path, stem: &str) -> Option<PathBuf> {
    let prefix = format!("{stem}.");
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| {
            n.strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".dylib"))
                .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
        })
        .collect();
    names.sort();
    names.first().map(|n| dir.join(n))
}

/// Case-insensitive lookup of `name` in `dir` (sorted for determinism).
fn find_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let wanted = name.to_ascii_lowercase();
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.to_ascii_lowercase() == wanted)
        .collect();
    names.sort();
    names.first().map(|n| dir.join(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"lib bytes").unwrap();
    }

    fn ctx(referencer: &Path) -> SearchContext {
        SearchContext {
            referencer: referencer.to_path_buf(),
            ..SearchContext::default()
        }
    }

    #[test]
    fn absolute_existing_reference_wins() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("libz.so.1");
        touch(&lib);
        let app = temp.path().join("app");
        touch(&app);

        let resolver = Resolver::new(BinaryFormat::Elf);
        let result = resolver.resolve(lib.to_str().unwrap(), &ctx(&app));
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&lib).unwrap()));
    }

    #[test]
    fn earlier_search_directory_wins() {
        let temp = tempfile::tempdir().unwrap();
        let first = temp.path().join("first/libdup.so");
        let second = temp.path().join("second/libdup.so");
        touch(&first);
        touch(&second);
        let app = temp.path().join("bin/app");
        touch(&app);

        let mut context = ctx(&app);
        context.rpaths = vec![temp.path().join("first"), temp.path().join("second")];

        let resolver = Resolver::new(BinaryFormat::Elf);
        let result = resolver.resolve("libdup.so", &context);
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&first).unwrap()));
    }

    #[test]
    fn own_directory_is_searched_before_rpath() {
        let temp = tempfile::tempdir().unwrap();
        let beside = temp.path().join("bin/libdup.so");
        let rpath = temp.path().join("libs/libdup.so");
        touch(&beside);
        touch(&rpath);
        let app = temp.path().join("bin/app");
        touch(&app);

        let mut context = ctx(&app);
        context.rpaths = vec![temp.path().join("libs")];

        let result = Resolver::new(BinaryFormat::Elf).resolve("libdup.so", &context);
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&beside).unwrap()));
    }

    #[test]
    fn rpath_reference_tries_entries_in_declared_order() {
        let temp = tempfile::tempdir().unwrap();
        let hit = temp.path().join("b/libr.dylib");
        touch(&hit);
        let app = temp.path().join("app");
        touch(&app);

        let mut context = ctx(&app);
        context.rpaths = vec![temp.path().join("a"), temp.path().join("b")];

        let result = Resolver::new(BinaryFormat::MachO).resolve("@rpath/libr.dylib", &context);
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&hit).unwrap()));
    }

    #[test]
    fn loader_path_resolves_beside_referencer() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("fw/libleaf.dylib");
        touch(&lib);
        let loader = temp.path().join("fw/libtrunk.dylib");
        touch(&loader);

        let result =
            Resolver::new(BinaryFormat::MachO).resolve("@loader_path/libleaf.dylib", &ctx(&loader));
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&lib).unwrap()));
    }

    #[test]
    fn self_reference_is_recognized() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("libself.dylib");
        touch(&lib);
        let canonical = fs::canonicalize(&lib).unwrap();

        let result = Resolver::new(BinaryFormat::MachO)
            .resolve(lib.to_str().unwrap(), &ctx(&canonical));
        assert_eq!(result, Resolution::SelfReference);
    }

    #[test]
    fn versioned_reference_falls_back_to_unversioned_file() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("libs/libfoo.so");
        touch(&lib);
        let app = temp.path().join("bin/app");
        touch(&app);

        let mut context = ctx(&app);
        context.extra = vec![temp.path().join("libs")];

        let result = Resolver::new(BinaryFormat::Elf).resolve("libfoo.so.3", &context);
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&lib).unwrap()));
    }

    #[test]
    fn unversioned_reference_falls_back_to_versioned_file() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("libs/libbar.so.2");
        touch(&lib);
        let app = temp.path().join("bin/app");
        touch(&app);

        let mut context = ctx(&app);
        context.extra = vec![temp.path().join("libs")];

        let result = Resolver::new(BinaryFormat::Elf).resolve("libbar.so", &context);
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&lib).unwrap()));
    }

    #[test]
    fn dll_lookup_is_case_insensitive() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("libs/vcruntime140.dll");
        touch(&lib);
        let app = temp.path().join("bin/app.exe");
        touch(&app);

        let mut context = ctx(&app);
        context.extra = vec![temp.path().join("libs")];

        let result = Resolver::new(BinaryFormat::Pe).resolve("VCRUNTIME140.dll", &context);
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&lib).unwrap()));
    }

    #[test]
    fn unresolved_reports_directories_in_search_order() {
        let temp = tempfile::tempdir().unwrap();
        let app = temp.path().join("bin/app");
        touch(&app);

        let mut context = ctx(&app);
        context.rpaths = vec![temp.path().join("r1")];
        context.extra = vec![temp.path().join("vendor")];

        let result = Resolver::new(BinaryFormat::Elf).resolve("libmissing.so", &context);
        match result {
            Resolution::Unresolved { searched } => {
                assert_eq!(
                    searched,
                    vec![
                        temp.path().join("bin"),
                        temp.path().join("r1"),
                        temp.path().join("vendor"),
                    ]
                );
            }
            other => panic!("expected unresolved, got {other:?}"),
        }
    }

    #[test]
    fn origin_token_expansion() {
        let temp = tempfile::tempdir().unwrap();
        let lib = temp.path().join("bin/libs/libo.so");
        touch(&lib);
        let app = temp.path().join("bin/app");
        touch(&app);

        let result = Resolver::new(BinaryFormat::Elf).resolve("$ORIGIN/libs/libo.so", &ctx(&app));
        assert_eq!(result, Resolution::Resolved(fs::canonicalize(&lib).unwrap()));
    }

    #[test]
    fn strip_helpers_handle_edge_cases() {
        assert_eq!(strip_so_version("libfoo.so.3.1"), Some("libfoo.so".to_string()));
        assert_eq!(strip_so_version("libfoo.so"), None);
        assert_eq!(strip_so_version("libfoo.so.abc"), None);
        assert_eq!(strip_dylib_version("libbar.3.dylib"), Some("libbar.dylib".to_string()));
        assert_eq!(strip_dylib_version("libbar.dylib"), None);
    }
}
