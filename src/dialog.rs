//! Modèle de vue du dialogue de gestion.
//!
//! La liste des règles, le filtre par type, le drag-and-drop et le
//! formulaire d'édition. Aucun rendu ici : le dialogue produit des
//! [`ListItem`] et des [`EditOutcome`], le [`crate::manager::RuleManager`]
//! applique les mutations.

use std::time::Duration;

use euclid::default::{Box2D, Point2D};

use crate::reorder::{DragSession, DropOutcome, ItemTransform};
use crate::rule::{Rule, RuleKey, RuleKind};

/// Feuille de style du dialogue, appliquée comme une règle interne au démarrage.
pub const BASE_CSS: &str = r#"
#chromerules-main-dialog, #chromerules-edit-dialog, #chromerules-confirm-dialog {
  padding: 15px; border: 1px solid var(--arrowpanel-border-color);
  border-radius: 4px; background: var(--arrowpanel-background);
  color: var(--arrowpanel-color); font-size: 14px; line-height: 14px;
  box-shadow: 0 1px 4px color-mix(in srgb, currentColor 20%, transparent);
}
#chromerules-main-dialog::backdrop, #chromerules-edit-dialog::backdrop,
#chromerules-confirm-dialog::backdrop {
  background: color-mix(in srgb, currentColor 10%, transparent);
}
.chromerules-list { display: flex; flex-direction: column; gap: 12px; }
.chromerules-kinds { display: flex; gap: 10px; }
.chromerules-item {
  display: flex; align-items: center; gap: 8px; user-select: none;
  transition: transform 0.3s ease-out, opacity 0.3s ease-out;
}
.chromerules-item.dragging { opacity: 0; pointer-events: none; }
.chromerules-item.fade-in { animation: chromerules-fade 0.5s ease-out; }
@keyframes chromerules-fade { from { opacity: 0; } to { opacity: 1; } }
.chromerules-label { flex: 1; cursor: grab; }
#chromerules-edit-dialog input[type=text], #chromerules-edit-dialog textarea {
  box-sizing: border-box; font-family: monospace;
}
#chromerules-edit-dialog textarea { min-height: 200px; max-height: 80vh; min-width: 400px; }
"#;

/// One row of the rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub key: RuleKey,
    /// Position in the store.
    pub index: usize,
    /// `[CSS] name` / `[JS] name`.
    pub label: String,
    pub enabled: bool,
    /// Hidden by the kind filter.
    pub visible: bool,
    pub draggable: bool,
}

/// Item to fade in after a committed drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FadeIn {
    pub key: RuleKey,
    pub duration: Duration,
}

/// État du dialogue principal.
pub struct ManagerDialog {
    open: bool,
    filter: Option<RuleKind>,
    drag: DragSession,
    fade_in: Duration,
}

impl ManagerDialog {
    pub fn new(item_gap: f32, fade_in: Duration) -> Self {
        Self {
            open: false,
            filter: None,
            drag: DragSession::new(item_gap),
            fade_in,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    /// Ferme le dialogue. Retourne `false` s'il était déjà fermé.
    pub fn close(&mut self) -> bool {
        self.drag.cancel();
        std::mem::replace(&mut self.open, false)
    }

    // ── Filtre ───────────────────────────────────────────────────────────

    pub fn filter(&self) -> Option<RuleKind> {
        self.filter
    }

    /// Case à cocher CSS/JS. Les deux sont exclusives : cocher l'une décoche
    /// l'autre, décocher la case active retire le filtre.
    pub fn set_filter(&mut self, kind: RuleKind, checked: bool) {
        if checked {
            self.filter = Some(kind);
            self.drag.cancel();
        } else if self.filter == Some(kind) {
            self.filter = None;
        }
    }

    pub fn dragging_enabled(&self) -> bool {
        self.filter.is_none()
    }

    /// Lignes de la liste, dans l'ordre du store.
    pub fn items<'a>(&self, rules: impl IntoIterator<Item = &'a Rule>) -> Vec<ListItem> {
        rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| ListItem {
                key: rule.key.clone(),
                index,
                label: rule.display_label(),
                enabled: rule.enabled,
                visible: self.filter.is_none_or(|kind| kind == rule.kind),
                draggable: self.dragging_enabled(),
            })
            .collect()
    }

    // ── Drag ─────────────────────────────────────────────────────────────

    /// Refusé tant qu'un filtre est actif.
    pub fn start_drag(&mut self, key: RuleKey, index: usize, geometry: Vec<Box2D<f32>>) -> bool {
        self.dragging_enabled() && self.drag.start(key, index, geometry)
    }

    pub fn drag_over(&mut self, point: Point2D<f32>) -> Option<usize> {
        self.drag.pointer_moved(point)
    }

    pub fn animation_frame(&mut self) -> Option<Vec<ItemTransform>> {
        self.drag.animation_frame()
    }

    pub fn end_drag(&mut self) -> DropOutcome {
        self.drag.drop()
    }

    pub fn cancel_drag(&mut self) -> DropOutcome {
        self.drag.cancel()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_dragging()
    }

    pub fn fade_in(&self, key: RuleKey) -> FadeIn {
        FadeIn {
            key,
            duration: self.fade_in,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Editor
// ─────────────────────────────────────────────────────────────────────────────

/// Result of pressing OK in the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Empty label: the editor stays open.
    Rejected,
    /// Label and code unchanged: close without touching the store.
    Unchanged,
    Created(Rule),
    Updated { rule: Rule, code_changed: bool },
}

/// Formulaire d'édition d'une règle, nouvelle ou existante.
#[derive(Debug, Clone)]
pub struct EditorDraft {
    /// `None` pour une nouvelle règle.
    key: Option<RuleKey>,
    kind: RuleKind,
    enabled: bool,
    original_label: String,
    original_code: String,
    pub label: String,
    pub code: String,
}

impl EditorDraft {
    /// Nouvelle règle, type CSS par défaut.
    pub fn new_rule() -> Self {
        Self {
            key: None,
            kind: RuleKind::Style,
            enabled: true,
            original_label: String::new(),
            original_code: String::new(),
            label: String::new(),
            code: String::new(),
        }
    }

    pub fn edit(rule: &Rule) -> Self {
        Self {
            key: Some(rule.key.clone()),
            kind: rule.kind,
            enabled: rule.enabled,
            original_label: rule.label.clone(),
            original_code: rule.code.clone(),
            label: rule.label.clone(),
            code: rule.code.clone(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.key.is_none()
    }

    pub fn key(&self) -> Option<&RuleKey> {
        self.key.as_ref()
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// The kind is fixed once a rule exists.
    pub fn set_kind(&mut self, kind: RuleKind) -> bool {
        if self.is_new() {
            self.kind = kind;
        }
        self.kind == kind
    }

    pub fn commit(&self) -> EditOutcome {
        let label = self.label.trim();
        if label.is_empty() {
            return EditOutcome::Rejected;
        }
        if label == self.original_label && self.code == self.original_code {
            return EditOutcome::Unchanged;
        }

        match &self.key {
            None => EditOutcome::Created(Rule::new(self.kind, label, self.code.clone())),
            Some(key) => EditOutcome::Updated {
                rule: Rule {
                    key: key.clone(),
                    kind: self.kind,
                    label: label.to_string(),
                    enabled: self.enabled,
                    code: self.code.clone(),
                },
                code_changed: self.code != self.original_code,
            },
        }
    }
}
