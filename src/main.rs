//! Point d'entrée de ChromeRules en ligne de commande.
//!
//! Usage :
//!   chromerules [--config FILE] [--chrome-dir DIR] [--yes] <commande>
//!
//! Commandes :
//!   list                   → liste les règles dans l'ordre
//!   import FILE...         → importe des .json / .css / .js / .mjs
//!   export DIR             → exporte vers un dossier
//!   backup                 → écrit l'archive de sauvegarde
//!   enable KEY | disable KEY
//!   move KEY INDEX
//!   remove KEY
//!
//! Sans fenêtre hôte : les feuilles sont seulement journalisées et les
//! scripts ne sont pas exécutés. `--yes` répond OK aux confirmations.

use std::env;
use std::error::Error;
use std::path::PathBuf;

use chromerules::config::Config;
use chromerules::error::RuleError;
use chromerules::host::headless::{LoggingStyleSheets, NoScriptRuntime, ScriptedChrome};
use chromerules::manager::RuleManager;
use chromerules::rule::RuleKey;

const USAGE: &str = "usage: chromerules [--config FILE] [--chrome-dir DIR] [--yes] \
<list|import FILE...|export DIR|backup|enable KEY|disable KEY|move KEY INDEX|remove KEY>";

fn main() -> Result<(), Box<dyn Error>> {
    // ── 1. Logging / Tracing ───────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // ── 2. Flags ───────────────────────────────────────────────────────
    let mut config_path: Option<PathBuf> = None;
    let mut chrome_dir: Option<PathBuf> = None;
    let mut assume_yes = false;
    let mut rest: Vec<String> = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().ok_or(USAGE)?.into()),
            "--chrome-dir" => chrome_dir = Some(args.next().ok_or(USAGE)?.into()),
            "--yes" | "-y" => assume_yes = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ => rest.push(arg),
        }
    }

    let (command, operands) = rest.split_first().ok_or(USAGE)?;

    // ── 3. Configuration ───────────────────────────────────────────────
    let mut config = match &config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(dir) = chrome_dir {
        config.storage.chrome_dir = dir;
    }

    // ── 4. Gestionnaire headless ───────────────────────────────────────
    let mut manager = RuleManager::from_config(
        &config,
        LoggingStyleSheets::default(),
        NoScriptRuntime,
        ScriptedChrome::new(assume_yes),
    );
    manager.start();

    let outcome = run(&mut manager, command, operands);

    // Flush + retrait des effets, même après une commande en échec.
    manager.teardown();
    outcome
}

type HeadlessManager =
    RuleManager<chromerules::store::FileStorage, LoggingStyleSheets, NoScriptRuntime, ScriptedChrome>;

fn run(manager: &mut HeadlessManager, command: &str, operands: &[String]) -> Result<(), Box<dyn Error>> {
    match (command, operands) {
        ("list", []) => {
            for (index, item) in manager.list_items().iter().enumerate() {
                let mark = if item.enabled { "x" } else { " " };
                println!("{index:>3} [{mark}] {}  ({})", item.label, item.key);
            }
        }
        ("import", files) if !files.is_empty() => {
            let files: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
            let report = manager.import_paths(&files);
            println!(
                "imported {} rule(s), {} already present, {} malformed, {} file(s) failed",
                report.added.len(),
                report.existing.len(),
                report.rejected.len(),
                report.failed.len()
            );
        }
        ("export", [dir]) => {
            let count = manager
                .export_to(&PathBuf::from(dir))
                .ok_or("export failed, see log")?;
            println!("exported {count} rule(s)");
        }
        ("backup", []) => {
            if !manager.backup() {
                return Err("backup not written (existing backup kept, use --yes to overwrite)".into());
            }
        }
        ("enable" | "disable", [key]) => {
            let key = RuleKey::from(key.as_str());
            if !manager.toggle(&key, command == "enable") {
                return Err(RuleError::UnknownRule(key).into());
            }
        }
        ("move", [key, index]) => {
            let key = RuleKey::from(key.as_str());
            let index: usize = index.parse()?;
            if !manager.store().contains(&key) {
                return Err(RuleError::UnknownRule(key).into());
            }
            manager.move_rule(&key, index);
        }
        ("remove", [key]) => {
            let key = RuleKey::from(key.as_str());
            if !manager.remove(&key) {
                return Err(RuleError::UnknownRule(key).into());
            }
        }
        _ => return Err(USAGE.into()),
    }
    Ok(())
}
