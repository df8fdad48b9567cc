//! Rule Store: the ordered rule sequence and its JSON persistence.
//!
//! Saving is diff-driven. The store remembers a snapshot of `[{key, enabled}]`
//! taken at the last successful write, plus a `dirty` flag raised by
//! structural edits (add, remove, reorder, content change). A flush writes
//! only if one of the two says the file is stale, so redrawing the dialog or
//! toggling a rule back and forth never touches the disk.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dependency::DependencyMirror;
use crate::error::{Result, RuleError};
use crate::rule::{Rule, RuleBody, RuleKey};

// ─────────────────────────────────────────────────────────────────────────────
// Storage backends
// ─────────────────────────────────────────────────────────────────────────────

/// Where the rule file lives.
pub trait RuleStorage {
    /// `Ok(None)` when nothing has been persisted yet.
    fn read(&self) -> io::Result<Option<String>>;
    fn write(&self, contents: &str) -> io::Result<()>;
}

/// The rule file on disk.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RuleStorage for FileStorage {
    fn read(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, contents)
    }
}

/// In-memory storage that counts writes.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: RefCell<Option<String>>,
    writes: Cell<usize>,
}

impl MemoryStorage {
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: RefCell::new(Some(contents.into())),
            writes: Cell::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.borrow().clone()
    }
}

impl RuleStorage for MemoryStorage {
    fn read(&self) -> io::Result<Option<String>> {
        Ok(self.contents.borrow().clone())
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        *self.contents.borrow_mut() = Some(contents.to_string());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

impl<S: RuleStorage + ?Sized> RuleStorage for std::rc::Rc<S> {
    fn read(&self) -> io::Result<Option<String>> {
        (**self).read()
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        (**self).write(contents)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serialization
// ─────────────────────────────────────────────────────────────────────────────

/// Serializes rules as one JSON object, keys in sequence order.
struct RulesObject<'a>(&'a [Rule]);

impl Serialize for RulesObject<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for rule in self.0 {
            map.serialize_entry(rule.key.as_str(), &rule.body())?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct SnapshotEntry<'a> {
    key: &'a str,
    enabled: bool,
}

/// Pretty JSON (2-space indent) of an ordered rule slice.
pub fn rules_to_json(rules: &[Rule]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&RulesObject(rules))?)
}

/// Parses a rule object, keeping key order. Entries that fail validation,
/// or whose key is not a plain file name, are returned in `rejected`.
pub fn parse_rules(text: &str) -> Result<ParsedRules> {
    let raw: IndexMap<String, Value> = serde_json::from_str(text)?;
    let mut parsed = ParsedRules::default();
    for (key, value) in raw {
        let rule_key = RuleKey::new(key.as_str());
        if !rule_key.is_storable() {
            parsed.rejected.push(key);
            continue;
        }
        match RuleBody::from_value(&value) {
            Some(body) => parsed.rules.push(Rule::from_body(rule_key, body)),
            None => parsed.rejected.push(key),
        }
    }
    Ok(parsed)
}

#[derive(Debug, Default)]
pub struct ParsedRules {
    pub rules: Vec<Rule>,
    pub rejected: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RuleStore
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered rule collection owned by one window session.
pub struct RuleStore<S: RuleStorage> {
    storage: S,
    mirror: Option<DependencyMirror>,
    rules: Vec<Rule>,
    persisted_snapshot: String,
    dirty: bool,
}

impl<S: RuleStorage> RuleStore<S> {
    /// Empty store. Call [`RuleStore::load`] to read persisted rules.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            mirror: None,
            rules: Vec::new(),
            persisted_snapshot: snapshot_of(&[]),
            dirty: false,
        }
    }

    /// Removing a rule also deletes its folder under this mirror.
    pub fn with_mirror(mut self, mirror: DependencyMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn mirror(&self) -> Option<&DependencyMirror> {
        self.mirror.as_ref()
    }

    /// Replaces the in-memory sequence with the persisted one. Never fails:
    /// a missing or unreadable file gives an empty store.
    pub fn load(&mut self) {
        self.rules = match self.storage.read() {
            Ok(Some(text)) => match parse_rules(&text) {
                Ok(parsed) => {
                    for key in &parsed.rejected {
                        warn!(key = %key, "Malformed rule entry skipped");
                    }
                    parsed.rules
                }
                Err(e) => {
                    warn!(error = %e, "Cannot parse rule file, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => {
                debug!("No rule file yet");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Cannot read rule file, starting empty");
                Vec::new()
            }
        };
        self.persisted_snapshot = self.snapshot();
        self.dirty = false;
        info!(count = self.rules.len(), "Rules loaded");
    }

    /// Writes the whole sequence. On failure the store stays dirty so the
    /// next flush tries again.
    pub fn save(&mut self) -> Result<()> {
        let json = rules_to_json(&self.rules)?;
        self.storage
            .write(&json)
            .map_err(|e| RuleError::io("<rule storage>", e))?;
        self.persisted_snapshot = self.snapshot();
        self.dirty = false;
        info!(count = self.rules.len(), "Rules saved");
        Ok(())
    }

    /// Saves only if something state-affecting changed since the last write.
    /// Returns `true` if a write happened. Errors are logged.
    pub fn save_if_needed(&mut self) -> bool {
        if !self.needs_save() {
            return false;
        }
        match self.save() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cannot save rules, will retry at next flush");
                false
            }
        }
    }

    pub fn needs_save(&self) -> bool {
        self.dirty || self.snapshot() != self.persisted_snapshot
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `[{key, enabled}]` digest used to detect toggles since the last write.
    pub fn snapshot(&self) -> String {
        snapshot_of(&self.rules)
    }

    pub fn to_json(&self) -> Result<String> {
        rules_to_json(&self.rules)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn keys(&self) -> impl Iterator<Item = &RuleKey> {
        self.rules.iter().map(|r| &r.key)
    }

    pub fn index_of(&self, key: &RuleKey) -> Option<usize> {
        self.rules.iter().position(|r| &r.key == key)
    }

    pub fn get(&self, key: &RuleKey) -> Option<&Rule> {
        self.rules.iter().find(|r| &r.key == key)
    }

    pub fn contains(&self, key: &RuleKey) -> bool {
        self.index_of(key).is_some()
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Appends a new rule, or replaces the content of the rule with the same
    /// key in place. The kind of an existing rule is kept.
    pub fn upsert(&mut self, rule: Rule) {
        match self.index_of(&rule.key) {
            Some(index) => {
                let existing = &mut self.rules[index];
                if rule.kind != existing.kind {
                    warn!(key = %rule.key, "Rule kind cannot change, keeping {}", existing.kind.as_str());
                }
                existing.label = rule.label;
                existing.enabled = rule.enabled;
                existing.code = rule.code;
                debug!(key = %existing.key, "Rule updated");
            }
            None => {
                debug!(key = %rule.key, "Rule added");
                self.rules.push(rule);
            }
        }
        self.dirty = true;
    }

    /// Deletes a rule and its dependency mirror. Unknown keys are ignored.
    pub fn remove(&mut self, key: &RuleKey) -> Option<Rule> {
        let index = self.index_of(key)?;
        let rule = self.rules.remove(index);
        if let Some(mirror) = &self.mirror {
            mirror.remove(key);
        }
        self.dirty = true;
        info!(key = %key, label = %rule.label, "Rule removed");
        Some(rule)
    }

    /// Moves a rule to `new_index` (clamped to the last position). Returns
    /// `true` if the order changed.
    pub fn reorder(&mut self, key: &RuleKey, new_index: usize) -> bool {
        let Some(from) = self.index_of(key) else {
            return false;
        };
        let to = new_index.min(self.rules.len() - 1);
        if from == to {
            return false;
        }
        let rule = self.rules.remove(from);
        self.rules.insert(to, rule);
        self.dirty = true;
        debug!(key = %key, from, to, "Rule moved");
        true
    }

    /// Sets the enabled flag and returns the rule so the caller can re-apply
    /// it. Not a structural change: the snapshot diff decides the next save.
    pub fn toggle(&mut self, key: &RuleKey, enabled: bool) -> Option<&Rule> {
        let index = self.index_of(key)?;
        let rule = &mut self.rules[index];
        rule.enabled = enabled;
        Some(rule)
    }
}

fn snapshot_of(rules: &[Rule]) -> String {
    let entries: Vec<SnapshotEntry<'_>> = rules
        .iter()
        .map(|r| SnapshotEntry {
            key: r.key.as_str(),
            enabled: r.enabled,
        })
        .collect();
    serde_json::to_string(&entries).unwrap_or_default()
}
