//! Réordonnancement par glisser-déposer: machine à états de la liste de règles.
//!
//! La géométrie des éléments est capturée une seule fois au début du drag ;
//! les mouvements du pointeur ne font que des hit-tests sur cette copie.
//! Les décalages visuels sont calculés par [`compute_shifts`] (fonction pure)
//! et livrés au plus une fois par frame via [`DragSession::animation_frame`].
//!
//! Aucune dépendance graphique : la couche visuelle consomme des
//! [`ItemTransform`] et commit le résultat via `RuleStore::reorder`.

use euclid::default::{Box2D, Point2D, Vector2D};
use tracing::debug;

use crate::rule::RuleKey;

/// Espace vertical par défaut entre deux éléments de la liste, en pixels.
pub const DEFAULT_ITEM_GAP: f32 = 12.0;

/// Vertical offset of every item while `dragged` hovers over `hover`.
///
/// Items strictly after the origin and up to `hover` move up by `shift` when
/// dragging down; items from `hover` up to the origin move down when
/// dragging up. The dragged item itself never moves.
pub fn compute_shifts(len: usize, dragged: usize, hover: usize, shift: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            if dragged < hover && i > dragged && i <= hover {
                -shift
            } else if hover < dragged && i >= hover && i < dragged {
                shift
            } else {
                0.0
            }
        })
        .collect()
}

/// Translation to apply to the item at `index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemTransform {
    pub index: usize,
    pub offset: Vector2D<f32>,
}

/// Issue d'un drag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// La règle doit être déplacée de `from` vers `to`.
    Moved { key: RuleKey, from: usize, to: usize },
    /// Lâchée à sa position d'origine, ou sans survol.
    Unchanged,
    /// Annulé (Escape, lâché hors de la liste, aucun drag en cours).
    Cancelled,
}

struct ActiveDrag {
    key: RuleKey,
    origin: usize,
    /// Boîtes des éléments visibles, capturées au `start`.
    geometry: Vec<Box2D<f32>>,
    shift: f32,
    hover: Option<usize>,
    frame_pending: bool,
}

impl ActiveDrag {
    /// Index survolé par `point`. Sous le dernier élément → dernier index.
    /// Dans un interstice, `None` (le survol précédent est conservé).
    fn hit_test(&self, point: Point2D<f32>) -> Option<usize> {
        let last = self.geometry.len().checked_sub(1)?;
        if point.y >= self.geometry[last].max.y {
            return Some(last);
        }
        if point.y < self.geometry[0].min.y {
            return Some(0);
        }
        self.geometry
            .iter()
            .position(|b| point.y >= b.min.y && point.y < b.max.y)
    }
}

/// État du drag.
enum DragState {
    Idle,
    Dragging(ActiveDrag),
}

/// Contrôleur de drag de la liste de règles : `Idle → Dragging → Idle`.
pub struct DragSession {
    gap: f32,
    state: DragState,
}

impl DragSession {
    pub fn new(gap: f32) -> Self {
        Self {
            gap,
            state: DragState::Idle,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    /// Commence un drag. Ignoré si `index` est hors de la géométrie.
    pub fn start(&mut self, key: RuleKey, index: usize, geometry: Vec<Box2D<f32>>) -> bool {
        let Some(dragged) = geometry.get(index) else {
            return false;
        };
        let shift = dragged.height() + self.gap;
        debug!(key = %key, index, shift, "Drag started");
        self.state = DragState::Dragging(ActiveDrag {
            key,
            origin: index,
            geometry,
            shift,
            hover: None,
            frame_pending: false,
        });
        true
    }

    /// Met à jour le survol. Une frame est programmée seulement si l'index
    /// survolé change ; plusieurs changements avant la frame sont fusionnés.
    pub fn pointer_moved(&mut self, point: Point2D<f32>) -> Option<usize> {
        let DragState::Dragging(drag) = &mut self.state else {
            return None;
        };
        if let Some(hover) = drag.hit_test(point)
            && drag.hover != Some(hover)
        {
            drag.hover = Some(hover);
            drag.frame_pending = true;
        }
        drag.hover
    }

    /// Transformations en attente pour cette frame, s'il y en a.
    pub fn animation_frame(&mut self) -> Option<Vec<ItemTransform>> {
        let DragState::Dragging(drag) = &mut self.state else {
            return None;
        };
        if !std::mem::take(&mut drag.frame_pending) {
            return None;
        }
        let hover = drag.hover.unwrap_or(drag.origin);
        let transforms = compute_shifts(drag.geometry.len(), drag.origin, hover, drag.shift)
            .into_iter()
            .enumerate()
            .map(|(index, dy)| ItemTransform {
                index,
                offset: Vector2D::new(0.0, dy),
            })
            .collect();
        Some(transforms)
    }

    /// Termine le drag dans la liste.
    pub fn drop(&mut self) -> DropOutcome {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Idle => DropOutcome::Cancelled,
            DragState::Dragging(drag) => match drag.hover {
                Some(to) if to != drag.origin => {
                    debug!(key = %drag.key, from = drag.origin, to, "Drag dropped");
                    DropOutcome::Moved {
                        key: drag.key,
                        from: drag.origin,
                        to,
                    }
                }
                _ => DropOutcome::Unchanged,
            },
        }
    }

    /// Abandonne le drag (Escape ou lâché hors de la liste).
    pub fn cancel(&mut self) -> DropOutcome {
        if let DragState::Dragging(drag) = std::mem::replace(&mut self.state, DragState::Idle) {
            debug!(key = %drag.key, "Drag cancelled");
        }
        DropOutcome::Cancelled
    }
}

impl Default for DragSession {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_GAP)
    }
}
