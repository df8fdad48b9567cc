//! Import, export and backup of the rule set.
//!
//! - Import accepts the native JSON format or standalone `.css` / `.js` /
//!   `.mjs` files. A standalone file becomes one rule and its relative
//!   dependencies are mirrored.
//! - Export writes a timestamped JSON plus one folder per rule.
//! - Backup is a gzip tar holding the rule JSON and the mirror tree.
//!
//! Nothing here applies rules: the manager applies what [`ImportReport::added`] lists.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::{Compression, write::GzEncoder};
use tar::Header;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dependency::{DependencyMirror, MirrorReport, sanitize_file_name};
use crate::error::{Result, RuleError};
use crate::rule::{Rule, RuleKey, RuleKind};
use crate::store::{RuleStorage, RuleStore, parse_rules, rules_to_json};

/// Extensions offered by the import file picker.
pub const IMPORT_FILTERS: &[&str] = &[".json", ".css", ".js", ".mjs"];

/// Name of the rule JSON inside a backup archive.
pub const BACKUP_RULES_ENTRY: &str = "UserChromeRules.json";

// ─────────────────────────────────────────────────────────────────────────────
// Import
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ImportReport {
    /// New rules, in insertion order.
    pub added: Vec<RuleKey>,
    /// JSON entries whose key is already in the store.
    pub existing: Vec<RuleKey>,
    /// JSON entries that failed validation.
    pub rejected: Vec<String>,
    /// Files that could not be read or parsed at all.
    pub failed: Vec<(PathBuf, String)>,
    /// Dependency mirroring of each standalone file.
    pub dependencies: Vec<(RuleKey, MirrorReport)>,
}

/// Imports `files` into `store`. Each file is independent: a bad file is
/// recorded in the report and the next one is tried.
pub fn import_files<S: RuleStorage>(
    store: &mut RuleStore<S>,
    mirror: &DependencyMirror,
    files: &[PathBuf],
) -> ImportReport {
    let mut report = ImportReport::default();
    for file in files {
        if let Err(e) = import_file(store, mirror, file, &mut report) {
            warn!(path = %file.display(), error = %e, "Import failed");
            report.failed.push((file.clone(), e.to_string()));
        }
    }
    info!(
        added = report.added.len(),
        existing = report.existing.len(),
        rejected = report.rejected.len(),
        failed = report.failed.len(),
        "Import finished"
    );
    report
}

fn import_file<S: RuleStorage>(
    store: &mut RuleStore<S>,
    mirror: &DependencyMirror,
    file: &Path,
    report: &mut ImportReport,
) -> Result<()> {
    let text = fs::read_to_string(file).map_err(|e| RuleError::io(file, e))?;

    let is_json = file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        let parsed = parse_rules(&text)?;
        for key in parsed.rejected {
            debug!(path = %file.display(), key = %key, "Malformed entry skipped");
            report.rejected.push(key);
        }
        for rule in parsed.rules {
            if store.contains(&rule.key) {
                report.existing.push(rule.key);
                continue;
            }
            report.added.push(rule.key.clone());
            store.upsert(rule);
        }
        return Ok(());
    }

    let kind = RuleKind::from_path(file).ok_or_else(|| {
        RuleError::io(
            file,
            io::Error::new(io::ErrorKind::InvalidInput, "unsupported file type"),
        )
    })?;
    let label = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rule".to_string());

    let rule = Rule::new(kind, label, text);
    let deps = mirror.mirror_dependencies(&rule.key, file, &rule.code, kind);
    report.added.push(rule.key.clone());
    report.dependencies.push((rule.key.clone(), deps));
    store.upsert(rule);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Export
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ExportSummary {
    pub json: PathBuf,
    pub rules: usize,
}

/// `UserChromeRules_2025-01-31T09-05-00.json`.
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("UserChromeRules_{}.json", now.format("%Y-%m-%dT%H-%M-%S"))
}

/// Folder of one exported rule: `<label>_<key suffix>`.
pub fn export_folder_name(rule: &Rule) -> String {
    format!(
        "{}_{}",
        sanitize_file_name(&rule.label),
        sanitize_file_name(rule.key.suffix())
    )
}

pub fn export_rules(rules: &[Rule], mirror: &DependencyMirror, dest: &Path) -> Result<ExportSummary> {
    export_rules_at(rules, mirror, dest, Utc::now())
}

/// Writes the rule JSON and one folder per rule into `dest`.
pub fn export_rules_at(
    rules: &[Rule],
    mirror: &DependencyMirror,
    dest: &Path,
    now: DateTime<Utc>,
) -> Result<ExportSummary> {
    fs::create_dir_all(dest).map_err(|e| RuleError::io(dest, e))?;

    let json = dest.join(export_file_name(now));
    fs::write(&json, rules_to_json(rules)?).map_err(|e| RuleError::io(&json, e))?;

    for rule in rules {
        let folder = dest.join(export_folder_name(rule));
        fs::create_dir_all(&folder).map_err(|e| RuleError::io(&folder, e))?;
        let code_file = folder.join(format!(
            "{}.{}",
            sanitize_file_name(&rule.label),
            rule.kind.as_str()
        ));
        fs::write(&code_file, &rule.code).map_err(|e| RuleError::io(&code_file, e))?;

        // A missing mirror copy does not void the rest of the export.
        if let Err(e) = mirror.copy_into(&rule.key, &folder) {
            warn!(key = %rule.key, error = %e, "Cannot export dependencies");
        }
    }

    info!(path = %dest.display(), count = rules.len(), "Rules exported");
    Ok(ExportSummary {
        json,
        rules: rules.len(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Backup
// ─────────────────────────────────────────────────────────────────────────────

/// Writes `dest` as a gzip tar with `rules_json` at [`BACKUP_RULES_ENTRY`]
/// and, if it exists, the mirror tree under its own directory name.
/// The archive is built in a temporary file next to `dest`, then renamed.
pub fn write_backup(rules_json: &str, mirror_root: &Path, dest: &Path) -> Result<()> {
    let mtime = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let mut header = Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_size(rules_json.len() as u64);
    builder
        .append_data(&mut header, BACKUP_RULES_ENTRY, rules_json.as_bytes())
        .map_err(|e| RuleError::io(dest, e))?;

    if mirror_root.is_dir() {
        let prefix = mirror_root
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("mirror"));
        for entry in WalkDir::new(mirror_root).sort_by(|a, b| a.path().cmp(b.path())) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable path during backup");
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(mirror_root) else {
                continue;
            };
            let name = prefix.join(rel);
            if entry.file_type().is_dir() {
                let mut header = Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_mtime(mtime);
                header.set_size(0);
                builder
                    .append_data(&mut header, &name, io::empty())
                    .map_err(|e| RuleError::io(entry.path(), e))?;
            } else if entry.file_type().is_file() {
                builder
                    .append_path_with_name(entry.path(), &name)
                    .map_err(|e| RuleError::io(entry.path(), e))?;
            }
        }
    }

    let tar_bytes = builder.into_inner().map_err(|e| RuleError::io(dest, e))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&tar_bytes)
        .map_err(|e| RuleError::io(dest, e))?;
    let gz = encoder.finish().map_err(|e| RuleError::io(dest, e))?;

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| RuleError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| RuleError::io(dir, e))?;
    tmp.write_all(&gz).map_err(|e| RuleError::io(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| RuleError::io(dest, e.error))?;

    info!(path = %dest.display(), bytes = gz.len(), "Backup written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;

    fn store() -> RuleStore<MemoryStorage> {
        RuleStore::new(MemoryStorage::default())
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let file = fs::File::open(path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_import_json_skips_malformed_and_existing() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DependencyMirror::new(dir.path().join("deps"));
        let mut store = store();
        store.upsert(Rule {
            key: RuleKey::from("old"),
            ..Rule::new(RuleKind::Style, "Old", "a{}")
        });

        let file = dir.path().join("rules.json");
        fs::write(
            &file,
            r#"{
  "old": {"type": "css", "label": "Dup", "enabled": true, "code": ""},
  "good": {"type": "js", "label": "Good", "enabled": false, "code": "x()"},
  "bad": {"type": "css", "label": "Bad", "code": ""}
}"#,
        )
        .unwrap();

        let report = import_files(&mut store, &mirror, &[file]);
        assert_eq!(report.added, vec![RuleKey::from("good")]);
        assert_eq!(report.existing, vec![RuleKey::from("old")]);
        assert_eq!(report.rejected, vec!["bad".to_string()]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&RuleKey::from("old")).unwrap().label, "Old");
        assert!(store.is_dirty());
    }

    #[test]
    fn test_import_standalone_file_mirrors_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("icons")).unwrap();
        fs::write(src.join("icons/a.svg"), "<svg/>").unwrap();
        fs::write(src.join("theme.css"), "b{}").unwrap();
        let file = src.join("Dark tabs.css");
        fs::write(&file, "@import 'theme.css';\na { background: url(./icons/) }").unwrap();

        let mirror = DependencyMirror::new(dir.path().join("deps"));
        let mut store = store();
        let report = import_files(&mut store, &mirror, &[file]);

        assert_eq!(report.added.len(), 1);
        let key = &report.added[0];
        let rule = store.get(key).unwrap();
        assert_eq!(rule.label, "Dark tabs");
        assert_eq!(rule.kind, RuleKind::Style);
        assert!(rule.enabled);
        assert!(mirror.dir_for(key).join("theme.css").is_file());
        assert!(mirror.dir_for(key).join("icons/a.svg").is_file());
    }

    #[test]
    fn test_import_bad_files_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DependencyMirror::new(dir.path().join("deps"));
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        let other = dir.path().join("notes.txt");
        fs::write(&other, "hello").unwrap();
        let good = dir.path().join("ok.js");
        fs::write(&good, "run()").unwrap();
        let missing = dir.path().join("missing.css");

        let mut store = store();
        let report = import_files(&mut store, &mirror, &[broken, other, missing, good]);
        assert_eq!(report.failed.len(), 3);
        assert_eq!(report.added.len(), 1);
        assert_eq!(store.rules()[0].kind, RuleKind::Script);
    }

    #[test]
    fn test_export_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DependencyMirror::new(dir.path().join("deps"));
        let rule = Rule {
            key: RuleKey::from("ucm_1_abc1234"),
            ..Rule::new(RuleKind::Style, "a/b: c", "a{}")
        };
        fs::create_dir_all(mirror.dir_for(&rule.key)).unwrap();
        fs::write(mirror.dir_for(&rule.key).join("theme.css"), "b{}").unwrap();

        let out = dir.path().join("out");
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 9, 5, 0).unwrap();
        let summary = export_rules_at(std::slice::from_ref(&rule), &mirror, &out, now).unwrap();

        assert_eq!(summary.rules, 1);
        assert_eq!(summary.json, out.join("UserChromeRules_2025-01-31T09-05-00.json"));
        let folder = out.join("a_b_ c_abc1234");
        assert_eq!(fs::read_to_string(folder.join("a_b_ c.css")).unwrap(), "a{}");
        assert!(folder.join("theme.css").is_file());

        let text = fs::read_to_string(&summary.json).unwrap();
        assert_eq!(parse_rules(&text).unwrap().rules, vec![rule]);
    }

    #[test]
    fn test_export_folder_stays_in_destination() {
        let rule = Rule {
            key: RuleKey::from("x_../../evil"),
            ..Rule::new(RuleKind::Style, "..", "a{}")
        };
        let name = export_folder_name(&rule);
        assert!(!name.contains(['/', '\\']), "{name}");

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mirror = DependencyMirror::new(dir.path().join("deps"));
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 9, 5, 0).unwrap();
        export_rules_at(std::slice::from_ref(&rule), &mirror, &out, now).unwrap();
        assert!(out.join(&name).is_dir());
        assert!(!dir.path().join("evil").exists());
    }

    #[test]
    fn test_import_json_rejects_reserved_and_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DependencyMirror::new(dir.path().join("deps"));
        let file = dir.path().join("rules.json");
        fs::write(
            &file,
            r#"{
  "__BASE_CSS__": {"type": "css", "label": "Base", "enabled": true, "code": "*{}"},
  "..": {"type": "css", "label": "Up", "enabled": true, "code": ""}
}"#,
        )
        .unwrap();

        let mut store = store();
        let report = import_files(&mut store, &mirror, &[file]);
        assert!(report.added.is_empty());
        assert_eq!(report.rejected, vec!["__BASE_CSS__".to_string(), "..".to_string()]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_backup_contains_rules_and_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mirror_root = dir.path().join("UserChromeRules");
        fs::create_dir_all(mirror_root.join("k")).unwrap();
        fs::write(mirror_root.join("k/theme.css"), "b{}").unwrap();

        let dest = dir.path().join("UserChromeRules.bak.tar.gz");
        write_backup("{}", &mirror_root, &dest).unwrap();

        let names = archive_names(&dest);
        assert!(names.contains(&BACKUP_RULES_ENTRY.to_string()));
        assert!(names.contains(&"UserChromeRules/k/theme.css".to_string()));
    }

    #[test]
    fn test_backup_without_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("b.tar.gz");
        write_backup("{}", &dir.path().join("nope"), &dest).unwrap();
        assert_eq!(archive_names(&dest), vec![BACKUP_RULES_ENTRY.to_string()]);
    }
}
