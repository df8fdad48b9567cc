//! Collaborators provided by the host window.
//!
//! The manager never talks to a browser directly. It is handed:
//! - a [`StyleSheetService`] that registers user sheets,
//! - a [`ContextProvider`] that creates isolated script contexts,
//! - a [`HostChrome`] for dialogs, pickers, menu and hotkey hooks.
//!
//! [`headless`] has implementations that only log, used by the CLI.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::hotkey::Hotkey;

/// Failure reported by a host collaborator (script exception, refused sheet...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Style sheets
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle to a registered user sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetHandle(pub u64);

pub trait StyleSheetService {
    /// Loads and registers the sheet at `uri` as a user sheet.
    fn register(&mut self, uri: &Url) -> Result<SheetHandle, HostError>;
    /// Unregisters a sheet. Unknown handles are ignored.
    fn unregister(&mut self, handle: SheetHandle);
}

// ─────────────────────────────────────────────────────────────────────────────
// Script contexts
// ─────────────────────────────────────────────────────────────────────────────

/// Teardown callback handed back by a script rule.
pub type Cleanup = Box<dyn FnOnce() -> Result<(), HostError>>;

/// What a script rule's entry point returns: an explicit cleanup, or nothing.
pub enum ScriptExit {
    None,
    Cleanup(Cleanup),
}

impl ScriptExit {
    pub fn cleanup(f: impl FnOnce() -> Result<(), HostError> + 'static) -> Self {
        Self::Cleanup(Box::new(f))
    }
}

impl fmt::Debug for ScriptExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("ScriptExit::None"),
            Self::Cleanup(_) => f.write_str("ScriptExit::Cleanup(..)"),
        }
    }
}

/// A sandbox scoped to the host window. Dropping it discards the sandbox.
pub trait ExecutionContext {
    /// Evaluates `code` as a classic script.
    fn evaluate(&mut self, code: &str) -> Result<ScriptExit, HostError>;
    /// Imports the file at `path` as a module, so its relative imports resolve
    /// against its own folder. Cleanup is the module's own business.
    fn import_module(&mut self, path: &Path) -> Result<(), HostError>;
}

pub trait ContextProvider {
    /// Creates a new sandbox named `name` (shown in the host's debugger).
    fn create_context(&mut self, name: &str) -> Result<Box<dyn ExecutionContext>, HostError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Window chrome
// ─────────────────────────────────────────────────────────────────────────────

/// Dialog, picker and hook primitives of the host window.
pub trait HostChrome {
    /// Modal OK/Cancel prompt. `true` on OK.
    fn confirm(&mut self, message: &str) -> bool;
    /// Modal message with a single OK button.
    fn notify(&mut self, message: &str);
    fn pick_folder(&mut self, title: &str) -> Option<PathBuf>;
    /// Multi-file picker. `filters` are extensions such as `".css"`.
    fn pick_files(&mut self, title: &str, filters: &[&str]) -> Vec<PathBuf>;
    /// Adds the entry that opens the manager to the application menu.
    fn insert_menu_item(&mut self, label: &str);
    fn remove_menu_item(&mut self);
    fn register_hotkey(&mut self, hotkey: &Hotkey);
    /// Reveals a folder in the system file manager.
    fn open_directory(&mut self, path: &Path);
    /// Asks the application to restart. `false` if a listener vetoed it.
    fn request_restart(&mut self) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// Headless implementations
// ─────────────────────────────────────────────────────────────────────────────

pub mod headless {
    //! Collaborators for running the manager without a browser window.

    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};

    use tracing::info;
    use url::Url;

    use super::{
        ContextProvider, ExecutionContext, HostChrome, HostError, ScriptExit, SheetHandle,
        StyleSheetService,
    };
    use crate::hotkey::Hotkey;

    /// Accepts every sheet and logs it.
    #[derive(Debug, Default)]
    pub struct LoggingStyleSheets {
        next: u64,
        registered: Vec<SheetHandle>,
    }

    impl LoggingStyleSheets {
        pub fn registered(&self) -> usize {
            self.registered.len()
        }
    }

    impl StyleSheetService for LoggingStyleSheets {
        fn register(&mut self, uri: &Url) -> Result<SheetHandle, HostError> {
            self.next += 1;
            let handle = SheetHandle(self.next);
            info!(handle = handle.0, bytes = uri.as_str().len(), "Sheet registered");
            self.registered.push(handle);
            Ok(handle)
        }

        fn unregister(&mut self, handle: SheetHandle) {
            self.registered.retain(|h| *h != handle);
            info!(handle = handle.0, "Sheet unregistered");
        }
    }

    /// No script runtime: every script is reported as not runnable.
    #[derive(Debug, Default)]
    pub struct NoScriptRuntime;

    struct NoScriptContext;

    impl ExecutionContext for NoScriptContext {
        fn evaluate(&mut self, _code: &str) -> Result<ScriptExit, HostError> {
            Err(HostError::new("no script runtime in headless mode"))
        }

        fn import_module(&mut self, _path: &Path) -> Result<(), HostError> {
            Err(HostError::new("no script runtime in headless mode"))
        }
    }

    impl ContextProvider for NoScriptRuntime {
        fn create_context(&mut self, _name: &str) -> Result<Box<dyn ExecutionContext>, HostError> {
            Ok(Box::new(NoScriptContext))
        }
    }

    /// Answers prompts from a fixed policy and scripted picker results.
    #[derive(Debug, Default)]
    pub struct ScriptedChrome {
        pub assume_yes: bool,
        pub folders: VecDeque<PathBuf>,
        pub files: VecDeque<Vec<PathBuf>>,
        pub messages: Vec<String>,
        pub menu_label: Option<String>,
        pub hotkeys: Vec<Hotkey>,
        pub restarts: usize,
    }

    impl ScriptedChrome {
        pub fn new(assume_yes: bool) -> Self {
            Self {
                assume_yes,
                ..Self::default()
            }
        }
    }

    impl HostChrome for ScriptedChrome {
        fn confirm(&mut self, message: &str) -> bool {
            info!(answer = self.assume_yes, "{message}");
            self.messages.push(message.to_string());
            self.assume_yes
        }

        fn notify(&mut self, message: &str) {
            info!("{message}");
            self.messages.push(message.to_string());
        }

        fn pick_folder(&mut self, _title: &str) -> Option<PathBuf> {
            self.folders.pop_front()
        }

        fn pick_files(&mut self, _title: &str, _filters: &[&str]) -> Vec<PathBuf> {
            self.files.pop_front().unwrap_or_default()
        }

        fn insert_menu_item(&mut self, label: &str) {
            self.menu_label = Some(label.to_string());
        }

        fn remove_menu_item(&mut self) {
            self.menu_label = None;
        }

        fn register_hotkey(&mut self, hotkey: &Hotkey) {
            self.hotkeys.push(hotkey.clone());
        }

        fn open_directory(&mut self, path: &Path) {
            info!(path = %path.display(), "Open directory");
        }

        fn request_restart(&mut self) -> bool {
            self.restarts += 1;
            true
        }
    }
}
