//! Durable session↔terminal associations.
//!
//! Associations survive host restarts as a single JSON object keyed by the
//! shell's OS process id, stored under one namespaced, workspace-scoped key.
//! Persistence is best-effort: a write failure is logged, a malformed
//! payload reads as "no prior associations".

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::integration::ShellIntegrationQuality;

/// Storage key for the association object.
pub const ASSOCIATION_STORE_KEY: &str = "termpilot.sessionTerminalAssociations";

/// One persisted terminal association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAssociation {
    pub session_id: String,
    pub shell_integration_quality: ShellIntegrationQuality,
    /// Invocation id the terminal was created for.
    pub id: String,
    pub is_background: bool,
}

/// Durable key-value storage for the association payload.
///
/// Reads and writes interleave with disposal callbacks on the same event
/// loop, so implementations must tolerate redundant writes and reads of
/// stale keys.
pub trait AssociationStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    /// Best-effort write; failures are the implementation's to log.
    fn write(&self, key: &str, value: &str);
}

/// Load the association map, treating any parse failure as empty.
pub fn load_associations(store: &dyn AssociationStore) -> HashMap<u32, SessionAssociation> {
    let Some(payload) = store.read(ASSOCIATION_STORE_KEY) else {
        return HashMap::new();
    };
    match serde_json::from_str::<HashMap<u32, SessionAssociation>>(&payload) {
        Ok(associations) => associations,
        Err(err) => {
            tracing::warn!(%err, "discarding malformed terminal association state");
            HashMap::new()
        }
    }
}

/// Persist the association map.
pub fn save_associations(store: &dyn AssociationStore, associations: &HashMap<u32, SessionAssociation>) {
    // BTreeMap for a stable serialization order.
    let ordered: BTreeMap<_, _> = associations.iter().collect();
    match serde_json::to_string(&ordered) {
        Ok(payload) => store.write(ASSOCIATION_STORE_KEY, &payload),
        Err(err) => tracing::warn!(%err, "failed to serialize terminal association state"),
    }
}

/// In-memory store for tests and embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryAssociationStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssociationStore for MemoryAssociationStore {
    fn read(&self, key: &str) -> Option<String> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), value.to_string());
    }
}

/// File-backed store: one JSON object per key, in a single state file.
#[derive(Debug)]
pub struct FileAssociationStore {
    path: PathBuf,
}

impl FileAssociationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default state-file location for a workspace, under the user data
    /// directory.
    pub fn default_path(workspace_root: &Path) -> Option<PathBuf> {
        let mut name = workspace_root
            .to_string_lossy()
            .replace(['/', '\\', ':'], "-");
        name.push_str(".json");
        let name = name.trim_start_matches('-').to_string();
        Some(
            dirs::data_dir()?
                .join("termpilot")
                .join("terminal-state")
                .join(name),
        )
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse state file {}", self.path.display()))
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(entries).context("failed to serialize state")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write state file {}", self.path.display()))?;
        Ok(())
    }
}

impl AssociationStore for FileAssociationStore {
    fn read(&self, key: &str) -> Option<String> {
        match self.read_all() {
            Ok(mut entries) => entries.remove(key),
            Err(err) => {
                tracing::warn!(%err, "state file unreadable; treating as empty");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        let mut entries = self.read_all().unwrap_or_default();
        entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.write_all(&entries) {
            tracing::warn!(%err, "failed to persist terminal association state");
        }
    }
}
