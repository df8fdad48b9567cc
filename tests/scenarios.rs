//! End-to-end scenarios on a real chrome directory, with recording host fakes.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chromerules::config::Config;
use chromerules::host::headless::ScriptedChrome;
use chromerules::host::{
    ContextProvider, ExecutionContext, HostError, ScriptExit, SheetHandle, StyleSheetService,
};
use chromerules::manager::RuleManager;
use chromerules::rule::{RuleKey, RuleKind};
use chromerules::store::FileStorage;
use pretty_assertions::assert_eq;
use url::Url;

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Sheets {
    next: u64,
    live: Vec<(SheetHandle, Url)>,
}

impl StyleSheetService for Sheets {
    fn register(&mut self, uri: &Url) -> Result<SheetHandle, HostError> {
        self.next += 1;
        self.live.push((SheetHandle(self.next), uri.clone()));
        Ok(SheetHandle(self.next))
    }

    fn unregister(&mut self, handle: SheetHandle) {
        self.live.retain(|(h, _)| *h != handle);
    }
}

type Log = Rc<RefCell<Vec<String>>>;

struct Scripts {
    log: Log,
}

struct Sandbox {
    log: Log,
}

impl ExecutionContext for Sandbox {
    fn evaluate(&mut self, code: &str) -> Result<ScriptExit, HostError> {
        self.log.borrow_mut().push(format!("run {code}"));
        if code.starts_with("with-cleanup") {
            let log = self.log.clone();
            let code = code.to_string();
            return Ok(ScriptExit::cleanup(move || {
                log.borrow_mut().push(format!("undo {code}"));
                Ok(())
            }));
        }
        Ok(ScriptExit::None)
    }

    fn import_module(&mut self, path: &Path) -> Result<(), HostError> {
        self.log
            .borrow_mut()
            .push(format!("module {}", path.extension().unwrap().to_string_lossy()));
        Ok(())
    }
}

impl ContextProvider for Scripts {
    fn create_context(&mut self, _name: &str) -> Result<Box<dyn ExecutionContext>, HostError> {
        Ok(Box::new(Sandbox {
            log: self.log.clone(),
        }))
    }
}

type Manager = RuleManager<FileStorage, Sheets, Scripts, ScriptedChrome>;

fn config(chrome_dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.chrome_dir = chrome_dir.to_path_buf();
    config
}

fn manager(chrome_dir: &Path) -> (Manager, Log) {
    let log = Log::default();
    let m = RuleManager::from_config(
        &config(chrome_dir),
        Sheets::default(),
        Scripts { log: log.clone() },
        ScriptedChrome::new(true),
    );
    (m, log)
}

fn user_sheets(m: &Manager) -> usize {
    // The dialog sheet is always registered while the manager runs.
    m.engine().sheets().live.len() - 1
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[test]
fn test_style_rule_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (mut m, _) = manager(dir.path());
    m.start();
    let draft = m.begin_edit(None).unwrap();
    draft.label = "Dark".into();
    draft.code = "body { background: black }".into();
    m.commit_edit().unwrap();
    assert_eq!(user_sheets(&m), 1);
    m.close_dialog();
    m.teardown();
    assert!(m.engine().sheets().live.is_empty());

    let text = fs::read_to_string(dir.path().join("UserChromeRules.json")).unwrap();
    assert!(text.contains("\"type\": \"css\""));
    assert!(text.contains("\"label\": \"Dark\""));

    let (mut again, _) = manager(dir.path());
    again.start();
    assert_eq!(again.store().len(), 1);
    assert_eq!(user_sheets(&again), 1);
}

#[test]
fn test_style_enable_disable_reenable() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("UserChromeRules.json"),
        r#"{"k": {"type": "css", "label": "X", "enabled": true, "code": "a{}"}}"#,
    )
    .unwrap();
    let (mut m, _) = manager(dir.path());
    m.start();
    let key = RuleKey::from("k");

    assert_eq!(m.engine().live_count(&key), 1);
    let first = m.engine().sheets().live.last().unwrap().0;
    m.toggle(&key, false);
    assert_eq!(m.engine().live_count(&key), 0);
    m.toggle(&key, true);
    assert_eq!(m.engine().live_count(&key), 1);
    assert_ne!(m.engine().sheets().live.last().unwrap().0, first);
}

#[test]
fn test_script_cleanup_and_restart_tip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("UserChromeRules.json"),
        r#"{
  "clean": {"type": "js", "label": "Clean", "enabled": true, "code": "with-cleanup a"},
  "sticky": {"type": "js", "label": "Sticky", "enabled": true, "code": "plain b"}
}"#,
    )
    .unwrap();
    let (mut m, log) = manager(dir.path());
    m.start();

    m.toggle(&RuleKey::from("clean"), false);
    assert!(log.borrow().contains(&"undo with-cleanup a".to_string()));
    assert!(m.chrome().messages.is_empty());

    m.toggle(&RuleKey::from("sticky"), false);
    assert_eq!(m.chrome().messages, vec![m.strings().tip_restart_js.clone()]);
}

#[test]
fn test_malformed_import_adds_only_valid_rule() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("incoming.json");
    fs::write(
        &file,
        r#"{
  "ok": {"type": "css", "label": "Fine", "enabled": true, "code": "a{}"},
  "no-type": {"label": "X", "enabled": true, "code": ""},
  "bad-kind": {"type": "html", "label": "X", "enabled": true, "code": ""},
  "bad-enabled": {"type": "js", "label": "X", "enabled": 1, "code": ""}
}"#,
    )
    .unwrap();

    let (mut m, _) = manager(dir.path());
    m.start();
    m.chrome_mut().files.push_back(vec![file]);
    let report = m.import().unwrap();

    assert_eq!(report.added, vec![RuleKey::from("ok")]);
    assert_eq!(report.rejected.len(), 3);
    assert_eq!(m.store().len(), 1);
    assert!(m.engine().is_live(&RuleKey::from("ok")));
}

#[test]
fn test_import_cannot_touch_dialog_sheet_or_other_folders() {
    let dir = tempfile::tempdir().unwrap();
    let chrome = dir.path().join("chrome");
    let kept = chrome.join("UserChromeRules").join("ucm_1_other");
    fs::create_dir_all(&kept).unwrap();
    fs::write(kept.join("keep.css"), "").unwrap();
    fs::write(chrome.join("userChrome.css"), "a{}").unwrap();

    let file = dir.path().join("incoming.json");
    fs::write(
        &file,
        r#"{
  "__BASE_CSS__": {"type": "css", "label": "Hijack", "enabled": true, "code": "*{display:none}"},
  "": {"type": "css", "label": "Empty", "enabled": true, "code": ""},
  "..": {"type": "css", "label": "Up", "enabled": true, "code": ""}
}"#,
    )
    .unwrap();

    let (mut m, _) = manager(&chrome);
    m.start();
    let base = m.engine().sheets().live[0].clone();
    let report = m.import_paths(&[file]);

    assert!(report.added.is_empty());
    assert_eq!(report.rejected.len(), 3);
    assert!(m.store().is_empty());
    assert_eq!(m.engine().sheets().live, vec![base.clone()]);

    for key in ["__BASE_CSS__", "", ".."] {
        assert!(!m.remove(&RuleKey::from(key)));
    }
    assert_eq!(m.engine().sheets().live, vec![base]);
    assert!(kept.join("keep.css").is_file());
    assert!(chrome.join("userChrome.css").is_file());
}

#[test]
fn test_dependency_isolation_between_rules() {
    let dir = tempfile::tempdir().unwrap();
    let chrome = dir.path().join("chrome");
    let src = dir.path().join("downloads");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("shared.css"), "x{}").unwrap();
    fs::write(src.join("one.css"), "@import 'shared.css';").unwrap();
    fs::write(src.join("two.css"), "@import url(\"shared.css\");").unwrap();

    let (mut m, _) = manager(&chrome);
    m.start();
    let report = m.import_paths(&[src.join("one.css"), src.join("two.css")]);
    let [one, two] = report.added.as_slice() else {
        panic!("expected two rules");
    };

    let mirror = chrome.join("UserChromeRules");
    assert!(mirror.join(one.as_str()).join("shared.css").is_file());
    assert!(mirror.join(two.as_str()).join("shared.css").is_file());

    // The imported sheet points into its own mirror.
    let sheet = &m.engine().sheets().live.last().unwrap().1;
    let expected = Url::from_file_path(mirror.join(two.as_str()).join("shared.css")).unwrap();
    assert!(sheet.as_str().contains(&chromerules::engine::percent_encode_css(expected.as_str())));

    assert!(m.remove(one));
    assert!(!mirror.join(one.as_str()).exists());
    assert!(mirror.join(two.as_str()).join("shared.css").is_file());

    assert!(m.remove(two));
    assert!(!mirror.exists(), "empty mirror root is removed");
}

#[test]
fn test_module_script_is_imported_from_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("lib.mjs"), "export const x = 1;").unwrap();
    fs::write(src.join("main.js"), "import { x } from './lib.mjs';").unwrap();

    let (mut m, log) = manager(&dir.path().join("chrome"));
    m.start();
    let report = m.import_paths(&[src.join("main.js")]);
    let key = &report.added[0];

    assert_eq!(m.store().get(key).unwrap().kind, RuleKind::Script);
    assert!(log.borrow().contains(&"module mjs".to_string()));
    assert!(!m.engine().has_cleanup(key));
}

#[test]
fn test_reorder_commit_persists() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("UserChromeRules.json"),
        r#"{
  "A": {"type": "css", "label": "A", "enabled": true, "code": ""},
  "B": {"type": "css", "label": "B", "enabled": true, "code": ""},
  "C": {"type": "css", "label": "C", "enabled": true, "code": ""},
  "D": {"type": "css", "label": "D", "enabled": true, "code": ""}
}"#,
    )
    .unwrap();
    let (mut m, _) = manager(dir.path());
    m.start();
    let geometry: Vec<_> = (0..4)
        .map(|i| {
            let top = i as f32 * 50.0;
            euclid::default::Box2D::new(
                euclid::default::Point2D::new(0.0, top),
                euclid::default::Point2D::new(200.0, top + 38.0),
            )
        })
        .collect();

    // Drop on the origin: nothing moves.
    assert!(m.start_drag(&RuleKey::from("A"), geometry.clone()));
    m.drag_over(euclid::default::Point2D::new(5.0, 10.0));
    assert_eq!(m.finish_drag(), None);

    assert!(m.start_drag(&RuleKey::from("A"), geometry));
    m.drag_over(euclid::default::Point2D::new(5.0, 110.0));
    assert!(m.finish_drag().is_some());
    m.close_dialog();

    let text = fs::read_to_string(dir.path().join("UserChromeRules.json")).unwrap();
    let order: Vec<usize> = ["\"B\"", "\"C\"", "\"A\"", "\"D\""]
        .iter()
        .map(|k| text.find(k).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "order is B, C, A, D");
}

#[test]
fn test_backup_archive_written_next_to_rules() {
    let dir = tempfile::tempdir().unwrap();
    let (mut m, _) = manager(dir.path());
    m.start();
    let src = dir.path().join("x.css");
    fs::write(&src, "a{}").unwrap();
    m.import_paths(&[src]);

    assert!(m.backup());
    let archive: PathBuf = dir.path().join("UserChromeRules.bak.tar.gz");
    assert!(archive.is_file());
    // Backup flushes pending changes first.
    assert!(dir.path().join("UserChromeRules.json").is_file());
}
