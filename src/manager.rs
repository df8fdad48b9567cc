//! Gestionnaire de règles: point d'entrée d'une fenêtre hôte.
//!
//! Possède le store, le moteur, le dialogue et les collaborateurs de l'hôte.
//! Toutes les erreurs s'arrêtent ici : elles sont journalisées et chaque
//! action retourne une valeur par défaut sûre.
//!
//! ## Points de flush
//!
//! Le store n'est écrit que via `save_if_needed`, appelé à la fermeture du
//! dialogue, avant un redémarrage, avant une sauvegarde et au teardown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use euclid::default::{Box2D, Point2D};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dependency::DependencyMirror;
use crate::dialog::{BASE_CSS, EditOutcome, EditorDraft, FadeIn, ListItem, ManagerDialog};
use crate::engine::{ExecutionEngine, Retraction};
use crate::host::{ContextProvider, HostChrome, StyleSheetService};
use crate::hotkey::{Hotkey, KeyPress};
use crate::i18n::Strings;
use crate::reorder::{DropOutcome, ItemTransform};
use crate::rule::{BASE_CSS_KEY, Rule, RuleKey, RuleKind};
use crate::store::{FileStorage, RuleStorage, RuleStore};
use crate::transfer::{self, IMPORT_FILTERS, ImportReport};

/// Runtime manager of one host window.
pub struct RuleManager<S, Sh, P, C>
where
    S: RuleStorage,
    Sh: StyleSheetService,
    P: ContextProvider,
    C: HostChrome,
{
    store: RuleStore<S>,
    engine: ExecutionEngine<Sh, P>,
    mirror: DependencyMirror,
    chrome: C,
    strings: Strings,
    hotkey: Hotkey,
    chrome_dir: PathBuf,
    backup_path: PathBuf,
    dialog: ManagerDialog,
    editor: Option<EditorDraft>,
    open_on_start: bool,
    started: bool,
}

impl<Sh, P, C> RuleManager<FileStorage, Sh, P, C>
where
    Sh: StyleSheetService,
    P: ContextProvider,
    C: HostChrome,
{
    /// Manager reading and writing the rule file named by `config`.
    pub fn from_config(config: &Config, sheets: Sh, contexts: P, chrome: C) -> Self {
        let storage = FileStorage::new(config.storage.rules_path());
        Self::new(config, storage, sheets, contexts, chrome)
    }
}

impl<S, Sh, P, C> RuleManager<S, Sh, P, C>
where
    S: RuleStorage,
    Sh: StyleSheetService,
    P: ContextProvider,
    C: HostChrome,
{
    pub fn new(config: &Config, storage: S, sheets: Sh, contexts: P, chrome: C) -> Self {
        let mirror = DependencyMirror::new(config.storage.mirror_path());
        let chrome_dir = config.storage.chrome_dir.clone();
        Self {
            store: RuleStore::new(storage).with_mirror(mirror.clone()),
            engine: ExecutionEngine::new(sheets, contexts, chrome_dir.clone(), mirror.clone()),
            mirror,
            chrome,
            strings: config.strings(),
            hotkey: config.hotkey(),
            chrome_dir,
            backup_path: config.storage.backup_path(),
            dialog: ManagerDialog::new(
                config.editor.item_gap,
                Duration::from_millis(config.editor.fade_in_ms),
            ),
            editor: None,
            open_on_start: config.editor.open_on_start,
            started: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn store(&self) -> &RuleStore<S> {
        &self.store
    }

    pub fn engine(&self) -> &ExecutionEngine<Sh, P> {
        &self.engine
    }

    pub fn chrome(&self) -> &C {
        &self.chrome
    }

    pub fn chrome_mut(&mut self) -> &mut C {
        &mut self.chrome
    }

    pub fn strings(&self) -> &Strings {
        &self.strings
    }

    pub fn dialog(&self) -> &ManagerDialog {
        &self.dialog
    }

    pub fn editor(&self) -> Option<&EditorDraft> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut EditorDraft> {
        self.editor.as_mut()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Loads the persisted rules, applies the dialog sheet and every rule,
    /// then hooks the menu entry and the hotkey. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        self.store.load();
        self.engine.apply(&base_css_rule());
        let live = self.engine.apply_all(self.store.rules());
        info!(rules = self.store.len(), live, "Rules applied");

        self.chrome.insert_menu_item(&self.strings.menu_label);
        self.chrome.register_hotkey(&self.hotkey);
        if self.open_on_start {
            self.open_dialog();
        }
    }

    /// Window unload: flush, retract every effect, unhook the menu entry.
    pub fn teardown(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        self.editor = None;
        self.dialog.close();
        self.store.save_if_needed();
        let retracted = self.engine.retract_all();
        self.chrome.remove_menu_item();
        info!(retracted, "Rule manager torn down");
    }

    /// Routes a key press. Returns `true` if it opened the dialog.
    pub fn handle_key(&mut self, press: &KeyPress) -> bool {
        if self.started && self.hotkey.matches(press) {
            self.open_dialog();
            return true;
        }
        false
    }

    // ── Dialog ───────────────────────────────────────────────────────────

    pub fn open_dialog(&mut self) -> Vec<ListItem> {
        self.dialog.open();
        self.list_items()
    }

    pub fn list_items(&self) -> Vec<ListItem> {
        self.dialog.items(self.store.iter())
    }

    /// Closes the dialog and flushes. Returns `true` if the store was written.
    pub fn close_dialog(&mut self) -> bool {
        self.editor = None;
        self.dialog.close();
        self.store.save_if_needed()
    }

    pub fn set_filter(&mut self, kind: RuleKind, checked: bool) -> Vec<ListItem> {
        self.dialog.set_filter(kind, checked);
        self.list_items()
    }

    /// Checkbox of a rule. Disabling a live script that gave no cleanup
    /// shows the restart tip.
    pub fn toggle(&mut self, key: &RuleKey, enabled: bool) -> bool {
        if !self.store.contains(key) {
            warn!(key = %key, "Toggle of unknown rule");
            return false;
        }
        if !enabled && self.engine.retract(key) == Retraction::ScriptWithoutCleanup {
            self.chrome.notify(&self.strings.tip_restart_js);
        }
        let Some(rule) = self.store.toggle(key, enabled) else {
            return false;
        };
        self.engine.apply(rule);
        debug!(key = %key, enabled, "Rule toggled");
        true
    }

    // ── Editor ───────────────────────────────────────────────────────────

    /// Opens the editor on `key`, or on a blank rule for `None`.
    pub fn begin_edit(&mut self, key: Option<&RuleKey>) -> Option<&mut EditorDraft> {
        let draft = match key {
            Some(key) => EditorDraft::edit(self.store.get(key)?),
            None => EditorDraft::new_rule(),
        };
        self.editor = Some(draft);
        self.editor.as_mut()
    }

    pub fn cancel_edit(&mut self) {
        self.editor = None;
    }

    /// OK button of the editor. A rejected draft stays open.
    pub fn commit_edit(&mut self) -> Option<EditOutcome> {
        let mut outcome = self.editor.as_ref()?.commit();
        match &mut outcome {
            EditOutcome::Rejected => return Some(EditOutcome::Rejected),
            EditOutcome::Unchanged => {}
            EditOutcome::Created(rule) => {
                self.store.upsert(rule.clone());
                self.engine.apply(rule);
                info!(key = %rule.key, label = %rule.label, "Rule created");
            }
            EditOutcome::Updated { rule, code_changed } => {
                // The checkbox may have changed while the editor was open.
                let Some(current) = self.store.get(&rule.key) else {
                    warn!(key = %rule.key, "Edited rule was removed meanwhile");
                    self.editor = None;
                    return None;
                };
                rule.enabled = current.enabled;
                self.store.upsert(rule.clone());
                if *code_changed {
                    self.engine.apply(rule);
                }
                info!(key = %rule.key, label = %rule.label, code_changed = *code_changed, "Rule edited");
            }
        }
        self.editor = None;
        Some(outcome)
    }

    /// Delete button. Asks first; retracts the effect then drops the rule
    /// and its dependency mirror.
    pub fn delete(&mut self, key: &RuleKey) -> bool {
        let Some(rule) = self.store.get(key) else {
            return false;
        };
        let prompt = self.strings.confirm_delete(rule.kind.badge(), &rule.label);
        if !self.chrome.confirm(&prompt) {
            return false;
        }
        self.remove(key)
    }

    /// Removes a rule without asking.
    pub fn remove(&mut self, key: &RuleKey) -> bool {
        if !self.store.contains(key) {
            return false;
        }
        self.engine.retract(key);
        self.store.remove(key).is_some()
    }

    // ── Reorder ──────────────────────────────────────────────────────────

    pub fn start_drag(&mut self, key: &RuleKey, geometry: Vec<Box2D<f32>>) -> bool {
        let Some(index) = self.store.index_of(key) else {
            return false;
        };
        self.dialog.start_drag(key.clone(), index, geometry)
    }

    pub fn drag_over(&mut self, point: Point2D<f32>) -> Option<usize> {
        self.dialog.drag_over(point)
    }

    pub fn animation_frame(&mut self) -> Option<Vec<ItemTransform>> {
        self.dialog.animation_frame()
    }

    /// Drop inside the list. Commits the move and returns the item to fade in.
    pub fn finish_drag(&mut self) -> Option<FadeIn> {
        match self.dialog.end_drag() {
            DropOutcome::Moved { key, to, .. } => {
                self.store.reorder(&key, to).then(|| self.dialog.fade_in(key))
            }
            DropOutcome::Unchanged | DropOutcome::Cancelled => None,
        }
    }

    pub fn cancel_drag(&mut self) {
        self.dialog.cancel_drag();
    }

    /// Moves a rule without drag (command line).
    pub fn move_rule(&mut self, key: &RuleKey, index: usize) -> bool {
        self.store.reorder(key, index)
    }

    // ── Import / export / backup ─────────────────────────────────────────

    /// Import button: picks files, imports and applies them.
    pub fn import(&mut self) -> Option<ImportReport> {
        let files = self.chrome.pick_files(&self.strings.picker_file, IMPORT_FILTERS);
        if files.is_empty() {
            return None;
        }
        Some(self.import_paths(&files))
    }

    pub fn import_paths(&mut self, files: &[PathBuf]) -> ImportReport {
        let report = transfer::import_files(&mut self.store, &self.mirror, files);
        for key in &report.added {
            if let Some(rule) = self.store.get(key) {
                self.engine.apply(rule);
            }
        }
        report
    }

    /// Export button: picks a folder and exports into it.
    pub fn export(&mut self) -> Option<usize> {
        let dir = self.chrome.pick_folder(&self.strings.picker_folder)?;
        self.export_to(&dir)
    }

    pub fn export_to(&mut self, dir: &Path) -> Option<usize> {
        match transfer::export_rules(self.store.rules(), &self.mirror, dir) {
            Ok(summary) => {
                self.chrome.notify(&self.strings.msg_export_ok(summary.rules));
                Some(summary.rules)
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Export failed");
                None
            }
        }
    }

    /// Backup button. Asks before overwriting an existing backup.
    pub fn backup(&mut self) -> bool {
        if self.backup_path.exists() && !self.chrome.confirm(&self.strings.confirm_overwrite) {
            return false;
        }
        self.store.save_if_needed();

        let result = self
            .store
            .to_json()
            .and_then(|json| transfer::write_backup(&json, self.mirror.root(), &self.backup_path));
        match result {
            Ok(()) => {
                self.chrome.notify(&self.strings.msg_backup_ok);
                true
            }
            Err(e) => {
                warn!(path = %self.backup_path.display(), error = %e, "Backup failed");
                false
            }
        }
    }

    pub fn open_folder(&mut self) {
        self.chrome.open_directory(&self.chrome_dir);
    }

    /// Restart button: asks, flushes, then requests the restart.
    pub fn restart(&mut self) -> bool {
        if !self.chrome.confirm(&self.strings.confirm_restart) {
            return false;
        }
        self.store.save_if_needed();
        let accepted = self.chrome.request_restart();
        if !accepted {
            info!("Restart vetoed by the host");
        }
        accepted
    }
}

/// Internal rule carrying the dialog sheet.
fn base_css_rule() -> Rule {
    Rule {
        key: RuleKey::new(BASE_CSS_KEY),
        kind: RuleKind::Style,
        label: "Chrome Rules dialog".to_string(),
        enabled: true,
        code: BASE_CSS.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::headless::{LoggingStyleSheets, NoScriptRuntime, ScriptedChrome};
    use crate::hotkey::Modifiers;
    use crate::store::MemoryStorage;
    use std::rc::Rc;

    type TestManager =
        RuleManager<Rc<MemoryStorage>, LoggingStyleSheets, NoScriptRuntime, ScriptedChrome>;

    const TWO_RULES: &str = r#"{
  "a": {"type": "css", "label": "A", "enabled": true, "code": "a{}"},
  "b": {"type": "css", "label": "B", "enabled": false, "code": "b{}"}
}"#;

    fn manager(dir: &Path, contents: &str, yes: bool) -> (TestManager, Rc<MemoryStorage>) {
        let mut config = Config::default();
        config.storage.chrome_dir = dir.to_path_buf();
        let storage = Rc::new(MemoryStorage::with_contents(contents));
        let m = RuleManager::new(
            &config,
            storage.clone(),
            LoggingStyleSheets::default(),
            NoScriptRuntime,
            ScriptedChrome::new(yes),
        );
        (m, storage)
    }

    #[test]
    fn test_start_applies_base_sheet_and_enabled_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, true);
        m.start();
        assert!(m.engine().is_live(&RuleKey::new(BASE_CSS_KEY)));
        assert!(m.engine().is_live(&RuleKey::from("a")));
        assert!(!m.engine().is_live(&RuleKey::from("b")));
        assert_eq!(m.engine().sheets().registered(), 2);
        assert_eq!(m.chrome().menu_label.as_deref(), Some("Chrome Rules"));
        assert_eq!(m.chrome().hotkeys, vec![Hotkey::default()]);

        // A second start changes nothing.
        m.start();
        assert_eq!(m.engine().sheets().registered(), 2);
    }

    #[test]
    fn test_base_sheet_never_listed_or_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, storage) = manager(dir.path(), TWO_RULES, true);
        m.start();
        assert_eq!(m.open_dialog().len(), 2);
        m.toggle(&RuleKey::from("b"), true);
        assert!(m.close_dialog());
        assert!(!storage.contents().unwrap().contains(BASE_CSS_KEY));
    }

    #[test]
    fn test_hotkey_opens_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), "{}", true);
        m.start();
        assert!(!m.handle_key(&KeyPress::new(Modifiers::default(), "u")));
        assert!(m.handle_key(&KeyPress::new(Modifiers::CTRL_ALT, "u")));
        assert!(m.dialog().is_open());
    }

    #[test]
    fn test_toggle_flushes_on_close_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, storage) = manager(dir.path(), TWO_RULES, true);
        m.start();
        assert!(m.toggle(&RuleKey::from("a"), false));
        assert!(!m.engine().is_live(&RuleKey::from("a")));
        assert_eq!(storage.write_count(), 0);

        // Toggled back before closing: nothing to write.
        m.toggle(&RuleKey::from("a"), true);
        assert!(!m.close_dialog());
        assert_eq!(storage.write_count(), 0);

        m.toggle(&RuleKey::from("b"), true);
        assert!(m.close_dialog());
        assert_eq!(storage.write_count(), 1);
    }

    #[test]
    fn test_edit_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), "{}", true);
        m.start();

        let draft = m.begin_edit(None).unwrap();
        draft.code = "a{}".into();
        assert_eq!(m.commit_edit(), Some(EditOutcome::Rejected));
        assert!(m.editor().is_some());

        m.editor_mut().unwrap().label = "New".into();
        let Some(EditOutcome::Created(rule)) = m.commit_edit() else {
            panic!("expected a created rule");
        };
        assert!(m.editor().is_none());
        assert!(m.engine().is_live(&rule.key));
        assert_eq!(m.store().len(), 1);

        let draft = m.begin_edit(Some(&rule.key)).unwrap();
        draft.code = "b{}".into();
        assert!(matches!(
            m.commit_edit(),
            Some(EditOutcome::Updated { code_changed: true, .. })
        ));
        assert_eq!(m.store().get(&rule.key).unwrap().code, "b{}");
        assert_eq!(m.engine().live_count(&rule.key), 1);
    }

    #[test]
    fn test_edit_keeps_toggle_made_while_editing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, true);
        m.start();
        let a = RuleKey::from("a");

        m.begin_edit(Some(&a)).unwrap().code = "a{color:red}".into();
        assert!(m.toggle(&a, false));
        assert!(matches!(
            m.commit_edit(),
            Some(EditOutcome::Updated { code_changed: true, .. })
        ));
        assert!(!m.store().get(&a).unwrap().enabled);
        assert!(!m.engine().is_live(&a));
    }

    #[test]
    fn test_edit_of_removed_rule_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, true);
        m.start();
        let a = RuleKey::from("a");

        m.begin_edit(Some(&a)).unwrap().label = "Renamed".into();
        assert!(m.remove(&a));
        assert_eq!(m.commit_edit(), None);
        assert!(m.editor().is_none());
        assert!(!m.store().contains(&a));
    }

    #[test]
    fn test_dialog_sheet_is_out_of_reach_of_rule_actions() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, true);
        m.start();
        let base = RuleKey::new(BASE_CSS_KEY);

        assert!(!m.toggle(&base, false));
        assert!(!m.remove(&base));
        assert!(m.engine().is_live(&base));
    }

    #[test]
    fn test_delete_asks_first() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, false);
        m.start();
        assert!(!m.delete(&RuleKey::from("a")));
        assert_eq!(m.chrome().messages, vec!["Delete CSS rule \"A\"?"]);
        assert_eq!(m.store().len(), 2);

        m.chrome_mut().assume_yes = true;
        assert!(m.delete(&RuleKey::from("a")));
        assert!(!m.engine().is_live(&RuleKey::from("a")));
        assert_eq!(m.store().len(), 1);
    }

    #[test]
    fn test_drag_commit_and_filter_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, true);
        m.start();
        let geometry = vec![
            Box2D::new(Point2D::new(0.0, 0.0), Point2D::new(100.0, 30.0)),
            Box2D::new(Point2D::new(0.0, 42.0), Point2D::new(100.0, 72.0)),
        ];

        m.set_filter(RuleKind::Style, true);
        assert!(!m.start_drag(&RuleKey::from("a"), geometry.clone()));
        m.set_filter(RuleKind::Style, false);

        assert!(m.start_drag(&RuleKey::from("a"), geometry));
        m.drag_over(Point2D::new(5.0, 500.0));
        assert!(m.animation_frame().is_some());
        let fade = m.finish_drag().unwrap();
        assert_eq!(fade.key, RuleKey::from("a"));
        assert_eq!(fade.duration, Duration::from_millis(500));
        let keys: Vec<_> = m.store().keys().map(RuleKey::as_str).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn test_backup_asks_before_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, false);
        m.start();
        assert!(m.backup());
        assert_eq!(m.chrome().messages, vec!["Backup written."]);

        // Existing backup, prompt declined.
        assert!(!m.backup());
        assert_eq!(m.chrome().messages.last().unwrap(), "A backup already exists. Overwrite it?");
    }

    #[test]
    fn test_restart_flushes_first() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, storage) = manager(dir.path(), TWO_RULES, true);
        m.start();
        m.toggle(&RuleKey::from("b"), true);
        assert!(m.restart());
        assert_eq!(storage.write_count(), 1);
        assert_eq!(m.chrome().restarts, 1);
    }

    #[test]
    fn test_export_notifies_count() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, _) = manager(dir.path(), TWO_RULES, true);
        m.start();
        m.chrome_mut().folders.push_back(dir.path().join("out"));
        assert_eq!(m.export(), Some(2));
        assert_eq!(m.chrome().messages, vec!["Exported 2 rule(s)."]);
        assert_eq!(m.export(), None, "no folder picked");
    }

    #[test]
    fn test_teardown_retracts_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, storage) = manager(dir.path(), TWO_RULES, true);
        m.start();
        m.toggle(&RuleKey::from("b"), true);
        m.teardown();
        assert_eq!(m.engine().live_len(), 0);
        assert_eq!(m.engine().sheets().registered(), 0);
        assert_eq!(m.chrome().menu_label, None);
        assert_eq!(storage.write_count(), 1);
    }
}
