//! State store for a single workspace.
//!
//! Layout under the project directory:
//!
//! ```text
//! .tierform/<workspace>/state.json
//! .tierform/<workspace>/state.json.backup
//! .tierform/<workspace>/lock.json
//! ```
//!
//! Every commit rewrites `state.json` through a temp file and a rename, so a
//! reader sees either the previous document or the next one, never a torn
//! write. The serial number increases by one per commit and is compared with
//! the on-disk value first, catching writers that bypassed the lock.

mod lock;

pub use lock::{LockInfo, StateLock};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::resource::{AttributeMap, ResourceId};

pub const STATE_VERSION: u32 = 1;
pub const STATE_DIR: &str = ".tierform";
pub const DEFAULT_WORKSPACE: &str = "default";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TEMP: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error(
        "state is locked by {holder} ({operation}) since {acquired_at}{}",
        stale_hint(.stale)
    )]
    LockHeld {
        holder: String,
        operation: String,
        acquired_at: DateTime<Utc>,
        stale: bool,
    },

    #[error("state was modified by another writer (expected serial {expected}, found {found})")]
    SerialConflict { expected: u64, found: u64 },

    #[error("workspace '{0}' is not locked")]
    NotLocked(String),

    #[error("{0} is not tracked in state")]
    NotTracked(String),
}

fn stale_hint(stale: &bool) -> &'static str {
    if *stale {
        "; the lock looks stale, run `tierform force-unlock` if no other run is active"
    } else {
        ""
    }
}

impl StateError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
        move |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Last-known real attributes of one converged resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: ResourceId,
    /// Identifier assigned by the provider on create.
    pub provider_id: String,
    /// Inputs as actually applied, with every reference resolved.
    pub inputs: AttributeMap,
    pub outputs: AttributeMap,
    /// Resources this one depended on when it was applied; orders its destroy.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    #[serde(default)]
    pub prevent_destroy: bool,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: ResourceId, provider_id: impl Into<String>) -> Self {
        Self {
            id,
            provider_id: provider_id.into(),
            inputs: AttributeMap::new(),
            outputs: AttributeMap::new(),
            dependencies: Vec::new(),
            prevent_destroy: false,
            updated_at: Utc::now(),
        }
    }

    pub fn with_inputs(mut self, inputs: AttributeMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: AttributeMap) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    pub serial: u64,
    pub updated_at: DateTime<Utc>,
    pub resources: BTreeMap<ResourceId, ResourceState>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct StateStore {
    workspace: String,
    dir: PathBuf,
    document: StateDocument,
}

impl StateStore {
    pub fn new(project_root: impl AsRef<Path>, workspace: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            dir: project_root.as_ref().join(STATE_DIR).join(workspace),
            document: StateDocument::default(),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<(), StateError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(StateError::io(&self.dir))?;
            tracing::debug!(dir = %self.dir.display(), "created state directory");
        }
        Ok(())
    }

    /// Reads the on-disk document, or an empty one if none exists yet.
    async fn read_document(&self) -> Result<Option<StateDocument>, StateError> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&path)(e)),
        };

        let document: StateDocument = serde_json::from_str(&content)?;
        if document.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: document.version,
                supported: STATE_VERSION,
            });
        }
        Ok(Some(document))
    }

    pub async fn load(&mut self) -> Result<&StateDocument, StateError> {
        self.document = self.read_document().await?.unwrap_or_default();
        tracing::debug!(
            workspace = %self.workspace,
            serial = self.document.serial,
            resources = self.document.resources.len(),
            "loaded state"
        );
        Ok(&self.document)
    }

    /// Writes an empty state document if none exists yet. Returns whether
    /// one was written.
    pub async fn initialize(&mut self) -> Result<bool, StateError> {
        if self.read_document().await?.is_some() {
            self.load().await?;
            return Ok(false);
        }
        self.document = StateDocument::default();
        self.commit(StateDocument::default()).await?;
        tracing::info!(workspace = %self.workspace, "initialized state");
        Ok(true)
    }

    pub fn document(&self) -> &StateDocument {
        &self.document
    }

    pub fn serial(&self) -> u64 {
        self.document.serial
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.document.resources.values()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.document.resources.get(id)
    }

    pub async fn upsert(&mut self, state: ResourceState) -> Result<(), StateError> {
        let id = state.id.clone();
        let mut next = self.document.clone();
        next.resources.insert(id.clone(), state);
        self.commit(next).await?;
        tracing::debug!(resource = %id, serial = self.document.serial, "state upserted");
        Ok(())
    }

    pub async fn remove(&mut self, id: &ResourceId) -> Result<ResourceState, StateError> {
        let mut next = self.document.clone();
        let removed = next
            .resources
            .remove(id)
            .ok_or_else(|| StateError::NotTracked(id.to_string()))?;
        self.commit(next).await?;
        tracing::debug!(resource = %id, serial = self.document.serial, "state entry removed");
        Ok(removed)
    }

    /// Writes `next` as the new document with the serial bumped by one.
    async fn commit(&mut self, mut next: StateDocument) -> Result<(), StateError> {
        self.ensure_dir().await?;

        let on_disk = self.read_document().await?.map_or(0, |d| d.serial);
        if on_disk != self.document.serial {
            return Err(StateError::SerialConflict {
                expected: self.document.serial,
                found: on_disk,
            });
        }

        next.version = STATE_VERSION;
        next.serial = self.document.serial + 1;
        next.updated_at = Utc::now();

        let path = self.state_path();
        if path.exists() {
            let backup = self.backup_path();
            fs::copy(&path, &backup)
                .await
                .map_err(StateError::io(&backup))?;
        }

        let temp = self.dir.join(STATE_TEMP);
        let content = serde_json::to_string_pretty(&next)?;
        fs::write(&temp, content)
            .await
            .map_err(StateError::io(&temp))?;
        fs::rename(&temp, &path)
            .await
            .map_err(StateError::io(&path))?;

        self.document = next;
        Ok(())
    }

    /// Takes the run lock. Any existing lock is an error; a stale one is
    /// reported as such but never removed here.
    pub async fn lock(&self, operation: &str, stale_after: Duration) -> Result<StateLock, StateError> {
        self.ensure_dir().await?;
        StateLock::acquire(self.lock_path(), operation, stale_after).await
    }

    pub async fn lock_info(&self) -> Result<Option<LockInfo>, StateError> {
        lock::read_lock(&self.lock_path()).await
    }

    /// Removes a lock left behind by a crashed or killed run.
    pub async fn force_unlock(&self) -> Result<LockInfo, StateError> {
        let path = self.lock_path();
        let info = lock::read_lock(&path)
            .await?
            .ok_or_else(|| StateError::NotLocked(self.workspace.clone()))?;
        fs::remove_file(&path).await.map_err(StateError::io(&path))?;
        tracing::warn!(holder = %info.holder, acquired_at = %info.acquired_at, "lock forcibly removed");
        Ok(info)
    }
}
