//! Dialog string table.
//!
//! English defaults, overridable key by key from the `[strings]` section of
//! the config file. Templates use `{type}`, `{name}` and `{count}`.

use indexmap::IndexMap;
use tracing::warn;

/// Every user-visible string of the manager dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strings {
    pub menu_label: String,
    pub btn_add: String,
    pub btn_export: String,
    pub btn_import: String,
    pub btn_backup: String,
    pub btn_folder: String,
    pub btn_restart: String,
    pub btn_exit: String,
    pub btn_modify: String,
    pub btn_delete: String,
    pub btn_ok: String,
    pub btn_cancel: String,
    pub placeholder_name: String,
    pub tip_restart_js: String,
    pub confirm_restart: String,
    /// Template: `{type}`, `{name}`.
    pub confirm_delete: String,
    pub confirm_overwrite: String,
    /// Template: `{count}`.
    pub msg_export_ok: String,
    pub msg_backup_ok: String,
    pub picker_folder: String,
    pub picker_file: String,
    pub picker_type: String,
}

impl Default for Strings {
    fn default() -> Self {
        Self {
            menu_label: "Chrome Rules".into(),
            btn_add: "Add".into(),
            btn_export: "Export".into(),
            btn_import: "Import".into(),
            btn_backup: "Backup".into(),
            btn_folder: "Folder".into(),
            btn_restart: "Restart".into(),
            btn_exit: "Close".into(),
            btn_modify: "Edit".into(),
            btn_delete: "Delete".into(),
            btn_ok: "OK".into(),
            btn_cancel: "Cancel".into(),
            placeholder_name: "Rule name".into(),
            tip_restart_js: "This script has no cleanup: restart the browser to fully disable it."
                .into(),
            confirm_restart: "Restart the browser now?".into(),
            confirm_delete: "Delete {type} rule \"{name}\"?".into(),
            confirm_overwrite: "A backup already exists. Overwrite it?".into(),
            msg_export_ok: "Exported {count} rule(s).".into(),
            msg_backup_ok: "Backup written.".into(),
            picker_folder: "Choose a folder".into(),
            picker_file: "Choose files".into(),
            picker_type: "Rule files".into(),
        }
    }
}

impl Strings {
    fn slot_mut(&mut self, key: &str) -> Option<&mut String> {
        Some(match key {
            "menu_label" => &mut self.menu_label,
            "btn_add" => &mut self.btn_add,
            "btn_export" => &mut self.btn_export,
            "btn_import" => &mut self.btn_import,
            "btn_backup" => &mut self.btn_backup,
            "btn_folder" => &mut self.btn_folder,
            "btn_restart" => &mut self.btn_restart,
            "btn_exit" => &mut self.btn_exit,
            "btn_modify" => &mut self.btn_modify,
            "btn_delete" => &mut self.btn_delete,
            "btn_ok" => &mut self.btn_ok,
            "btn_cancel" => &mut self.btn_cancel,
            "placeholder_name" => &mut self.placeholder_name,
            "tip_restart_js" => &mut self.tip_restart_js,
            "confirm_restart" => &mut self.confirm_restart,
            "confirm_delete" => &mut self.confirm_delete,
            "confirm_overwrite" => &mut self.confirm_overwrite,
            "msg_export_ok" => &mut self.msg_export_ok,
            "msg_backup_ok" => &mut self.msg_backup_ok,
            "picker_folder" => &mut self.picker_folder,
            "picker_file" => &mut self.picker_file,
            "picker_type" => &mut self.picker_type,
            _ => return None,
        })
    }

    /// Applies overrides. Unknown keys are logged and ignored.
    /// Returns how many strings changed.
    pub fn update(&mut self, overrides: &IndexMap<String, String>) -> usize {
        let mut applied = 0;
        for (key, value) in overrides {
            match self.slot_mut(key) {
                Some(slot) => {
                    *slot = value.clone();
                    applied += 1;
                }
                None => warn!(key = %key, "Unknown string key ignored"),
            }
        }
        applied
    }

    pub fn confirm_delete(&self, kind: &str, name: &str) -> String {
        self.confirm_delete
            .replace("{type}", kind)
            .replace("{name}", name)
    }

    pub fn msg_export_ok(&self, count: usize) -> String {
        self.msg_export_ok.replace("{count}", &count.to_string())
    }
}
