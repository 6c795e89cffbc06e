//! Action discovery: scans a directory of TOML manifests and binds each one
//! against the builtin ledger into an immutable, ordered catalog.
//!
//! A manifest names a `kind` (the entry-point binding) and may override the
//! unit's name, description and interval, plus kind-specific `[params]`:
//!
//! ```toml
//! kind = "welcome"
//! name = "Greeter"
//! description = "Welcomes new RF nodes"
//!
//! [params]
//! message = "Welcome aboard!"
//! ```
//!
//! Malformed manifests are skipped with a warning; partial load is fine.
//! Reload replaces the whole catalog atomically (consumers hold an `Arc`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

use crate::actions::{build_builtin, Action, ActionDescriptor};
use crate::errors::RegistryError;

#[derive(Debug, Deserialize)]
struct Manifest {
    kind: Option<String>,
    name: Option<String>,
    description: Option<String>,
    interval_minutes: Option<u64>,
    #[serde(default)]
    params: toml::Table,
}

/// The loaded action units, in discovery order. Immutable after load.
pub struct ActionCatalog {
    actions: Vec<Box<dyn Action>>,
}

impl ActionCatalog {
    pub fn iter(&self) -> impl Iterator<Item = &dyn Action> {
        self.actions.iter().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions.iter().map(|a| a.descriptor().clone()).collect()
    }

    /// Empty catalog, used when the manifest directory is unusable.
    pub fn empty() -> Arc<Self> {
        Self::from_actions(Vec::new())
    }

    /// Explicit registration path: build a catalog straight from units,
    /// bypassing manifest discovery. Tests and embedders use this.
    pub fn from_actions(actions: Vec<Box<dyn Action>>) -> Arc<Self> {
        Arc::new(Self { actions })
    }
}

pub struct ActionRegistry {
    dir: PathBuf,
}

impl ActionRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Scan the manifest directory and build a fresh catalog. Manifests are
    /// taken in sorted file-name order so discovery order is deterministic;
    /// nothing downstream may assume priority beyond that. Only the
    /// directory scan itself can fail; bad manifests are skipped.
    pub fn load(&self) -> Result<Arc<ActionCatalog>, RegistryError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut actions: Vec<Box<dyn Action>> = Vec::with_capacity(paths.len());
        for path in &paths {
            match Self::load_manifest(path) {
                Ok(action) => {
                    info!("loaded action: {}", action.descriptor().name);
                    actions.push(action);
                }
                Err(e) => {
                    warn!("skipping action manifest: {e}");
                }
            }
        }
        info!(
            "action catalog ready: {} of {} manifests from {}",
            actions.len(),
            paths.len(),
            self.dir.display()
        );
        Ok(Arc::new(ActionCatalog { actions }))
    }

    fn load_manifest(path: &Path) -> Result<Box<dyn Action>, RegistryError> {
        let file = path.display().to_string();
        let text = std::fs::read_to_string(path)?;
        let manifest: Manifest =
            toml::from_str(&text).map_err(|source| RegistryError::Parse {
                file: file.clone(),
                source,
            })?;

        let kind = manifest
            .kind
            .ok_or_else(|| RegistryError::MissingKind { file: file.clone() })?;

        // Manifest values are untrusted; an interval too large to express in
        // seconds skips the manifest like any other bad value.
        let interval = match manifest.interval_minutes {
            None => None,
            Some(minutes) => {
                let secs = minutes.checked_mul(60).ok_or_else(|| {
                    RegistryError::InvalidParams {
                        kind: kind.clone(),
                        reason: format!("`interval_minutes` {minutes} is out of range"),
                    }
                })?;
                Some(Duration::from_secs(secs))
            }
        };

        // Defaults: unit name falls back to the manifest file stem; no
        // interval means packet-triggered only (builtins may install their
        // own default interval).
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let descriptor = ActionDescriptor {
            name: manifest.name.unwrap_or(stem),
            description: manifest.description.unwrap_or_default(),
            interval,
        };

        build_builtin(&kind, descriptor, &manifest.params)
            .ok_or(RegistryError::UnknownKind { file, kind })?
    }
}
