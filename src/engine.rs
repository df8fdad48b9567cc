//! Moteur d'exécution: applique et retire l'effet vivant d'une règle.
//!
//! ## Cycle de vie d'un effet
//!
//! ```text
//! apply(rule) ──► retract(key) ──► enabled ? ──non──► (aucun effet)
//!                                     │
//!                                    oui
//!                    ┌────────────────┴────────────────┐
//!                  Style                             Script
//!       réécriture url()/@import          contexte isolé + évaluation
//!       data:text/css → register()        ScriptExit::Cleanup | None
//!                    └────────────────┬────────────────┘
//!                          live[key] = LiveEffect
//! ```
//!
//! Le moteur est l'unique propriétaire des handles (feuille enregistrée ou
//! contexte de script) : une seule table `key → LiveEffect`, au plus une
//! entrée par clé. Aucune erreur ne sort de `apply`/`retract` : elles sont
//! journalisées et la règle reste sans effet.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Captures;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::dependency::{self, CSS_IMPORT, CSS_URL, DependencyMirror};
use crate::error::{Result, RuleError};
use crate::host::{
    Cleanup, ContextProvider, ExecutionContext, ScriptExit, SheetHandle, StyleSheetService,
};
use crate::rule::{Rule, RuleKey, RuleKind};

/// Schemes left untouched by the style rewriter.
const ABSOLUTE_SCHEMES: &[&str] = &["data:", "http:", "https:", "file:", "chrome:", "resource:"];

/// Effet vivant d'une règle appliquée.
enum LiveEffect {
    Style {
        handle: SheetHandle,
    },
    Script {
        /// Gardé vivant tant que la règle est appliquée ; le drop libère le sandbox.
        _context: Box<dyn ExecutionContext>,
        cleanup: Option<Cleanup>,
    },
}

/// Résultat d'un retrait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retraction {
    /// Aucun effet n'existait pour cette clé.
    Nothing,
    /// L'effet a été entièrement retiré.
    Released,
    /// Un script sans cleanup a été abandonné : ce qu'il a modifié dans la
    /// fenêtre reste en place jusqu'au redémarrage.
    ScriptWithoutCleanup,
}

/// Applique les règles via les services de l'hôte.
pub struct ExecutionEngine<S, P> {
    sheets: S,
    contexts: P,
    /// Base de résolution des références relatives (dossier chrome).
    base_dir: PathBuf,
    mirror: DependencyMirror,
    live: HashMap<RuleKey, LiveEffect>,
}

impl<S: StyleSheetService, P: ContextProvider> ExecutionEngine<S, P> {
    pub fn new(sheets: S, contexts: P, base_dir: impl Into<PathBuf>, mirror: DependencyMirror) -> Self {
        Self {
            sheets,
            contexts,
            base_dir: base_dir.into(),
            mirror,
            live: HashMap::new(),
        }
    }

    pub fn sheets(&self) -> &S {
        &self.sheets
    }

    pub fn contexts(&self) -> &P {
        &self.contexts
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Nombre d'effets vivants pour `key` : 0 ou 1.
    pub fn live_count(&self, key: &RuleKey) -> usize {
        usize::from(self.live.contains_key(key))
    }

    pub fn is_live(&self, key: &RuleKey) -> bool {
        self.live.contains_key(key)
    }

    /// `true` si la règle est un script vivant qui a fourni un cleanup.
    pub fn has_cleanup(&self, key: &RuleKey) -> bool {
        matches!(
            self.live.get(key),
            Some(LiveEffect::Script {
                cleanup: Some(_),
                ..
            })
        )
    }

    pub fn live_keys(&self) -> impl Iterator<Item = &RuleKey> {
        self.live.keys()
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    // ── Apply / retract ──────────────────────────────────────────────────

    /// Retire l'effet courant de la règle puis, si elle est activée, en crée
    /// un nouveau. Retourne `true` si la règle a un effet vivant ensuite.
    pub fn apply(&mut self, rule: &Rule) -> bool {
        self.retract(&rule.key);
        if !rule.enabled {
            return false;
        }

        let effect = match rule.kind {
            RuleKind::Style => self.apply_style(rule),
            RuleKind::Script => self.apply_script(rule),
        };

        match effect {
            Ok(effect) => {
                debug!(key = %rule.key, label = %rule.label, "Rule applied");
                self.live.insert(rule.key.clone(), effect);
                true
            }
            Err(e) => {
                error!(key = %rule.key, label = %rule.label, error = %e, "Rule failed to apply");
                false
            }
        }
    }

    /// Applique un lot de règles dans l'ordre. Retourne le nombre d'effets vivants créés.
    pub fn apply_all<'a>(&mut self, rules: impl IntoIterator<Item = &'a Rule>) -> usize {
        rules.into_iter().filter(|rule| self.apply(rule)).count()
    }

    /// Retire l'effet vivant de `key`. Sans effet, ne fait rien.
    pub fn retract(&mut self, key: &RuleKey) -> Retraction {
        let Some(effect) = self.live.remove(key) else {
            return Retraction::Nothing;
        };
        match effect {
            LiveEffect::Style { handle } => {
                self.sheets.unregister(handle);
                debug!(key = %key, "Sheet unregistered");
                Retraction::Released
            }
            LiveEffect::Script { _context, cleanup } => {
                let retraction = match cleanup {
                    Some(cleanup) => {
                        if let Err(e) = cleanup() {
                            warn!(key = %key, error = %e, "Script cleanup failed");
                        }
                        Retraction::Released
                    }
                    None => Retraction::ScriptWithoutCleanup,
                };
                // Le contexte est libéré ici, après son cleanup.
                drop(_context);
                debug!(key = %key, "Script context discarded");
                retraction
            }
        }
    }

    /// Retire tous les effets (fermeture de la fenêtre).
    pub fn retract_all(&mut self) -> usize {
        let keys: Vec<RuleKey> = self.live.keys().cloned().collect();
        for key in &keys {
            self.retract(key);
        }
        if !keys.is_empty() {
            info!(count = keys.len(), "All rule effects retracted");
        }
        keys.len()
    }

    // ── Style ────────────────────────────────────────────────────────────

    fn apply_style(&mut self, rule: &Rule) -> Result<LiveEffect> {
        let css = self.rewrite_style_references(&rule.key, &rule.code);
        let uri = Url::parse(&css_data_uri(&css))
            .map_err(|e| RuleError::Style {
                label: rule.label.clone(),
                message: e.to_string(),
            })?;
        let handle = self.sheets.register(&uri).map_err(|e| RuleError::Style {
            label: rule.label.clone(),
            message: e.to_string(),
        })?;
        Ok(LiveEffect::Style { handle })
    }

    /// Réécrit `@import` et `url(...)` relatifs en URLs `file://` absolues.
    pub fn rewrite_style_references(&self, key: &RuleKey, css: &str) -> String {
        let imports = CSS_IMPORT.replace_all(css, |caps: &Captures<'_>| {
            match self.resolve_reference(key, &caps[2]) {
                Some(url) => format!("@import url({q}{url}{q})", q = &caps[1]),
                None => caps[0].to_string(),
            }
        });
        CSS_URL
            .replace_all(&imports, |caps: &Captures<'_>| {
                match self.resolve_reference(key, &caps[2]) {
                    Some(url) => format!("url({q}{url}{q})", q = &caps[1]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Résout une référence : les schémas absolus sont conservés, le reste est
    /// joint au dossier miroir de la règle si le fichier y existe, sinon au
    /// dossier chrome.
    fn resolve_reference(&self, key: &RuleKey, reference: &str) -> Option<String> {
        let lower = reference.to_ascii_lowercase();
        if ABSOLUTE_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return Some(reference.to_string());
        }

        let mirror_dir = self.mirror.dir_for(key);
        let base = if mirror_dir.join(dependency::strip_query(reference)).exists() {
            mirror_dir
        } else {
            self.base_dir.clone()
        };
        let resolved = Url::from_directory_path(&base)
            .ok()
            .and_then(|base_url| base_url.join(reference).ok());
        if resolved.is_none() {
            warn!(key = %key, reference, base = %base.display(), "Cannot resolve style reference");
        }
        resolved.map(String::from)
    }

    // ── Script ───────────────────────────────────────────────────────────

    fn apply_script(&mut self, rule: &Rule) -> Result<LiveEffect> {
        let script_error = |message: String| RuleError::Script {
            label: rule.label.clone(),
            message,
        };

        let mut context = self
            .contexts
            .create_context(&format!("Chrome Rule: {}", rule.label))
            .map_err(|e| script_error(e.to_string()))?;

        if dependency::has_module_dependencies(&rule.code) {
            let dir = self.module_dir(&rule.key);
            self.import_as_module(context.as_mut(), &dir, rule)?;
            info!(key = %rule.key, dir = %dir.display(), "Script loaded as module");
            return Ok(LiveEffect::Script {
                _context: context,
                cleanup: None,
            });
        }

        let cleanup = match context.evaluate(&rule.code).map_err(|e| script_error(e.0))? {
            ScriptExit::Cleanup(cleanup) => Some(cleanup),
            ScriptExit::None => None,
        };
        Ok(LiveEffect::Script {
            _context: context,
            cleanup,
        })
    }

    /// Dossier où le module temporaire est écrit : le miroir de la règle s'il
    /// existe (les imports relatifs y trouvent leurs fichiers), sinon le dossier chrome.
    fn module_dir(&self, key: &RuleKey) -> PathBuf {
        let mirror_dir = self.mirror.dir_for(key);
        if mirror_dir.is_dir() {
            mirror_dir
        } else {
            self.base_dir.clone()
        }
    }

    /// Écrit le code dans un `.mjs` temporaire, l'importe, puis le supprime.
    fn import_as_module(
        &self,
        context: &mut dyn ExecutionContext,
        dir: &Path,
        rule: &Rule,
    ) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix(".chromerule-")
            .suffix(".mjs")
            .tempfile_in(dir)
            .map_err(|e| RuleError::io(dir, e))?;
        let path = file.path().to_path_buf();
        let written = file.write_all(rule.code.as_bytes()).and_then(|()| file.flush());
        written.map_err(|e| RuleError::io(&path, e))?;

        let result = context.import_module(&path);

        if let Err(e) = file.close() {
            warn!(path = %path.display(), error = %e, "Cannot remove temporary module");
        }
        result.map_err(|e| RuleError::Script {
            label: rule.label.clone(),
            message: e.0,
        })
    }
}

/// `data:` URI carrying a user style sheet.
pub fn css_data_uri(css: &str) -> String {
    format!("data:text/css;charset=utf-8,{}", percent_encode_css(css))
}

/// Percent-encodes style sheet text for a `data:` URI payload.
///
/// CSS punctuation that is inert in a URI path (`{}:;,()!*'@=+/`) is kept
/// readable; `#`, `?` and `%` would cut or corrupt the payload and are
/// always escaped, as are quotes, whitespace and non-ASCII bytes.
pub fn percent_encode_css(css: &str) -> String {
    let mut out = String::with_capacity(css.len() + css.len() / 2);
    for byte in css.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.~{}:;,()!*'@=+/".contains(&byte) {
            out.push(char::from(byte));
        } else {
            // Writing into a String cannot fail.
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
