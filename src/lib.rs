//! # ChromeRules: gestionnaire de règles de chrome utilisateur
//!
//! Enregistre, persiste, applique à chaud, réordonne, importe/exporte et
//! retire des « règles » : des extraits CSS (feuilles utilisateur) ou JS
//! (exécutés dans un contexte isolé) qui modifient l'interface du navigateur.
//!
//! ## Architecture des modules
//!
//! - [`store`] : Séquence ordonnée des règles et sa persistance JSON.
//!   Sauvegarde pilotée par diff (snapshot `[{key, enabled}]` + flag `dirty`).
//!
//! - [`engine`] : Applique et retire l'effet vivant d'une règle. Une seule
//!   table `key → LiveEffect` ; contrat de sortie explicite des scripts.
//!
//! - [`dependency`] : Miroir des fichiers référencés par une règle importée
//!   (`@import`, `url()`, `import … from`), avec garde anti-traversée.
//!
//! - [`reorder`] : Glisser-déposer, calcul pur des décalages et machine à
//!   états de la session de drag.
//!
//! - [`dialog`] / [`manager`] : Modèle de vue du dialogue et orchestration
//!   des actions utilisateur (édition, suppression, import, export, backup).
//!
//! - [`host`] : Traits des collaborateurs fournis par la fenêtre hôte
//!   (service de feuilles de style, contextes de script, chrome).
//!
//! - [`transfer`], [`config`], [`i18n`], [`hotkey`], [`rule`], [`error`] :
//!   modules de support.

pub mod config;
pub mod dependency;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod host;
pub mod hotkey;
pub mod i18n;
pub mod manager;
pub mod reorder;
pub mod rule;
pub mod store;
pub mod transfer;
