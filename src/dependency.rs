//! Dependency mirror: per-rule copies of the files a rule references.
//!
//! A style or script imported from a standalone file may pull in sibling
//! files (`@import "theme.css"`, `url(./icons/)`, `import x from './lib.mjs'`).
//! Those are copied into `<mirror root>/<rule key>/`, keeping their path
//! relative to the imported file, so the rule keeps working after the
//! original folder is gone.
//!
//! Every failure here is per-dependency: it is logged and the pass goes on.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, RuleError};
use crate::rule::{RuleKey, RuleKind};

/// `@import "x.css"`, `@import url(x.css)`. Capture 1 is the quote, 2 the path.
pub(crate) static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:url\(\s*)?(['"]?)([^'")\s;]+)['"]?\s*\)?"#)
        .expect("static regex")
});

/// `url(x)`, `url('x')`, `url("x")`. Capture 1 is the quote, 2 the path.
pub(crate) static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(['"]?)([^'")]+?)['"]?\s*\)"#).expect("static regex")
});

/// `import a from 'x'`, `export * from 'x'`, `import 'x'`, `import('x')`.
static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(?:\b(?:import|export)\b[^'"`;]*?\bfrom\s*['"]([^'"]+)['"]|\bimport\s*['"]([^'"]+)['"]|\bimport\(\s*['"]([^'"]+)['"]\s*\))"#,
    )
    .expect("static regex")
});

/// Extensions a referenced file must carry to be mirrored.
const MIRRORED_EXTENSIONS: &[&str] = &["css", "js", "mjs"];

// ─────────────────────────────────────────────────────────────────────────────
// Scanning
// ─────────────────────────────────────────────────────────────────────────────

/// Returns `true` if `reference` is a path relative to the rule's file
/// (no scheme, not rooted, not a fragment).
pub fn is_relative_reference(reference: &str) -> bool {
    let r = reference.trim();
    if r.is_empty() || r.starts_with('/') || r.starts_with('\\') || r.starts_with('#') {
        return false;
    }
    // Scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"
    if let Some(colon) = r.find(':') {
        let scheme = &r[..colon];
        let is_scheme = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme {
            return false;
        }
    }
    true
}

/// Drops `?query` and `#fragment` from a reference.
pub(crate) fn strip_query(reference: &str) -> &str {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    &reference[..end]
}

/// Whether a reference is worth mirroring: a folder (trailing `/` or no
/// extension on the last segment) or a file with a mirrored extension.
fn is_mirrorable(reference: &str) -> bool {
    if reference.ends_with('/') || reference.ends_with('\\') {
        return true;
    }
    match Path::new(reference).extension().and_then(|e| e.to_str()) {
        None => true,
        Some(ext) => MIRRORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
    }
}

/// Distinct relative references found in `code`, in order of appearance.
pub fn scan_references(code: &str, kind: RuleKind) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |raw: &str| {
        let reference = strip_query(raw.trim());
        if is_relative_reference(reference)
            && is_mirrorable(reference)
            && seen.insert(reference.to_string())
        {
            found.push(reference.to_string());
        }
    };

    match kind {
        RuleKind::Style => {
            for caps in CSS_IMPORT.captures_iter(code) {
                push(&caps[2]);
            }
            for caps in CSS_URL.captures_iter(code) {
                push(&caps[2]);
            }
        }
        RuleKind::Script => {
            for caps in JS_IMPORT.captures_iter(code) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                    push(m.as_str());
                }
            }
        }
    }
    found
}

/// Whether a script must be loaded as a module because it imports relative files.
pub fn has_module_dependencies(code: &str) -> bool {
    !scan_references(code, RuleKind::Script).is_empty()
}

/// Resolves `.` and `..` lexically. `None` if the path climbs above its base.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mirror
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one mirroring pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    /// Relative paths copied (files and folders).
    pub copied: Vec<PathBuf>,
    /// References already covered earlier in the same pass.
    pub skipped: usize,
    /// `(reference, error)` for each dependency that could not be copied.
    pub failed: Vec<(String, String)>,
}

impl MirrorReport {
    pub fn is_empty(&self) -> bool {
        self.copied.is_empty() && self.failed.is_empty()
    }
}

/// Root of all per-rule dependency folders.
#[derive(Debug, Clone)]
pub struct DependencyMirror {
    root: PathBuf,
}

impl DependencyMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mirror folder of one rule. May not exist. Always a direct child of
    /// the root, whatever the key contains.
    pub fn dir_for(&self, key: &RuleKey) -> PathBuf {
        self.root.join(sanitize_file_name(key.as_str()))
    }

    pub fn exists(&self, key: &RuleKey) -> bool {
        self.dir_for(key).is_dir()
    }

    /// Copies every dependency referenced by `code` (and, transitively, by the
    /// copied style/script files) from the folder of `source_file` into the
    /// mirror folder of `key`.
    pub fn mirror_dependencies(
        &self,
        key: &RuleKey,
        source_file: &Path,
        code: &str,
        kind: RuleKind,
    ) -> MirrorReport {
        let mut report = MirrorReport::default();
        let Some(source_dir) = source_file.parent() else {
            return report;
        };
        let target_dir = self.dir_for(key);

        let mut queue: VecDeque<(PathBuf, String)> = scan_references(code, kind)
            .into_iter()
            .map(|r| (PathBuf::new(), r))
            .collect();
        let mut done: HashSet<PathBuf> = HashSet::new();

        while let Some((base, reference)) = queue.pop_front() {
            let Some(rel) = normalize_relative(&base.join(&reference)) else {
                warn!(key = %key, reference = %reference, "Dependency escapes the rule folder, skipped");
                report
                    .failed
                    .push((reference, "path escapes the source folder".to_string()));
                continue;
            };
            if done.contains(&rel) || rel.ancestors().skip(1).any(|a| done.contains(a)) {
                report.skipped += 1;
                continue;
            }
            done.insert(rel.clone());

            match copy_dependency(source_dir, &target_dir, &rel) {
                Ok(copied_files) => {
                    debug!(key = %key, path = %rel.display(), files = copied_files.len(), "Dependency mirrored");
                    // Follow nested references of copied style/script files.
                    for file in copied_files {
                        let Some(nested_kind) = RuleKind::from_path(&file) else {
                            continue;
                        };
                        let Ok(text) = fs::read_to_string(source_dir.join(&file)) else {
                            continue;
                        };
                        let nested_base = file.parent().map(Path::to_path_buf).unwrap_or_default();
                        for nested in scan_references(&text, nested_kind) {
                            queue.push_back((nested_base.clone(), nested));
                        }
                    }
                    report.copied.push(rel);
                }
                Err(e) => {
                    warn!(key = %key, reference = %reference, error = %e, "Cannot mirror dependency");
                    report.failed.push((reference, e.to_string()));
                }
            }
        }

        if !report.is_empty() {
            info!(
                key = %key,
                copied = report.copied.len(),
                failed = report.failed.len(),
                "Dependencies mirrored"
            );
        }
        report
    }

    /// Copies the mirror folder of `key` into `dest`. Returns the number of
    /// files copied (0 if the rule has no mirror).
    pub fn copy_into(&self, key: &RuleKey, dest: &Path) -> Result<usize> {
        let dir = self.dir_for(key);
        if !dir.is_dir() {
            return Ok(0);
        }
        copy_tree(&dir, dest)
    }

    /// Removes the mirror folder of `key`, then the root if it is now empty.
    /// Failures are logged only.
    pub fn remove(&self, key: &RuleKey) {
        let dir = self.dir_for(key);
        if dir.exists() {
            match fs::remove_dir_all(&dir) {
                Ok(()) => info!(key = %key, "Dependency mirror removed"),
                Err(e) => {
                    warn!(key = %key, path = %dir.display(), error = %e, "Cannot remove dependency mirror");
                    return;
                }
            }
        }
        let root_is_empty = fs::read_dir(&self.root)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if root_is_empty && let Err(e) = fs::remove_dir(&self.root) {
            warn!(path = %self.root.display(), error = %e, "Cannot remove empty mirror root");
        }
    }
}

/// Copies `rel` (file or folder) from `source_dir` to `target_dir`.
/// Returns the relative paths of the files copied.
fn copy_dependency(source_dir: &Path, target_dir: &Path, rel: &Path) -> Result<Vec<PathBuf>> {
    let src = source_dir.join(rel);

    // Symlinks may point anywhere: the resolved path must stay in source_dir.
    let canonical = src.canonicalize().map_err(|e| RuleError::io(&src, e))?;
    let source_canonical = source_dir
        .canonicalize()
        .map_err(|e| RuleError::io(source_dir, e))?;
    if !canonical.starts_with(&source_canonical) {
        return Err(RuleError::PathEscape {
            path: canonical,
            root: source_canonical,
        });
    }

    let dest = target_dir.join(rel);
    if canonical.is_dir() {
        let mut files = Vec::new();
        for entry in WalkDir::new(&canonical).follow_links(false) {
            let entry = entry.map_err(|e| RuleError::io(&canonical, io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let inner = entry
                .path()
                .strip_prefix(&canonical)
                .map_err(|e| RuleError::io(entry.path(), io::Error::other(e)))?;
            copy_file(entry.path(), &dest.join(inner))?;
            files.push(rel.join(inner));
        }
        Ok(files)
    } else {
        copy_file(&canonical, &dest)?;
        Ok(vec![rel.to_path_buf()])
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| RuleError::io(parent, e))?;
    }
    fs::copy(from, to).map_err(|e| RuleError::io(from, e))?;
    Ok(())
}

/// Recursively copies the content of `src` into `dest`, keeping the layout.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| RuleError::io(src, io::Error::other(e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| RuleError::io(entry.path(), io::Error::other(e)))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| RuleError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Makes a rule label usable as a file or folder name.
pub fn sanitize_file_name(label: &str) -> String {
    let replaced: String = label
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "rule".to_string()
    } else {
        trimmed.to_string()
    }
}
