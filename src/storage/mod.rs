//! Persisted model at `$XDG_DATA_HOME/threadbox/state.json`.
//!
//! The whole model is one versioned JSON document. Writes go to a temporary
//! file that is synced and renamed over the original, so a crash mid-write
//! leaves the previous document intact. `Persister` coalesces bursts of
//! commits into a single write on a background task.
//!
//! Only one process may own the model at a time. The owner holds an
//! exclusive advisory lock on `state.json.lock` (`StateLock`) from load
//! until shutdown. A second process gets `Error::StateLocked`.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::project::Project;
use crate::thread::Thread;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedModel {
    pub version: u32,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub threads: Vec<Thread>,
    /// Settings in effect when the model was written.
    #[serde(default)]
    pub settings: Settings,
}

impl Default for PersistedModel {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            projects: Vec::new(),
            threads: Vec::new(),
            settings: Settings::default(),
        }
    }
}

impl PersistedModel {
    /// Repair what a hand-edited or older document can get wrong. Pinned
    /// counts past the tab list are clamped; a session name used twice is
    /// an error since sessions are keyed by name.
    pub fn normalize(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for thread in &mut self.threads {
            if let Some(dup) = thread.session_names().find(|name| !seen.insert(name.to_string())) {
                return Err(Error::Persistence(format!(
                    "session {dup} appears more than once"
                )));
            }
            thread.normalize();
        }
        Ok(())
    }
}

/// Exclusive advisory lock held by the process that owns the model.
/// Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: fs::File,
    path: PathBuf,
}

impl StateLock {
    /// Lock `<state_path>.lock` without blocking.
    ///
    /// # Errors
    ///
    /// `Error::StateLocked` if another process (or another open handle in
    /// this one) holds it.
    pub fn acquire(state_path: &Path) -> Result<Self> {
        if let Some(parent) = state_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let path = PathBuf::from(format!("{}.lock", state_path.display()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Locked {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::StateLocked(state_path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to unlock {}: {e}", self.path.display());
        }
    }
}

/// Load the model. Returns an empty model if the file doesn't exist.
///
/// # Errors
///
/// Returns `Error::Persistence` if the file exists but can't be read or
/// parsed, was written by a newer schema, or reuses a session name.
pub fn load_model(path: &Path) -> Result<PersistedModel> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PersistedModel::default()),
        Err(e) => return Err(e.into()),
    };

    let mut model: PersistedModel = serde_json::from_str(&contents)
        .map_err(|e| Error::Persistence(format!("failed to parse {}: {e}", path.display())))?;
    if model.version > SCHEMA_VERSION {
        return Err(Error::Persistence(format!(
            "{} has schema version {}, newer than supported {SCHEMA_VERSION}",
            path.display(),
            model.version
        )));
    }
    model.normalize()?;
    Ok(model)
}

/// Save the model atomically (temp file with PID suffix, fsync, rename).
pub fn save_model(path: &Path, model: &PersistedModel) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let serialized = serde_json::to_string_pretty(model)
        .map_err(|e| Error::Persistence(format!("failed to serialize model: {e}")))?;

    let temp_path = PathBuf::from(format!("{}.tmp.{}", path.display(), std::process::id()));

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    debug!("Saved model to {}", path.display());
    Ok(())
}

/// Background writer that keeps only the latest snapshot pending.
#[derive(Debug)]
pub struct Persister {
    path: Option<PathBuf>,
    tx: watch::Sender<Option<Arc<PersistedModel>>>,
    task: Option<JoinHandle<()>>,
    /// Serializes writes so two never share the temp file.
    write_lock: Arc<Mutex<()>>,
}

impl Persister {
    /// Start the writer task. `None` keeps everything in memory.
    pub fn spawn(path: Option<PathBuf>) -> Self {
        let (tx, rx) = watch::channel(None);
        let write_lock = Arc::new(Mutex::new(()));
        let task = path
            .clone()
            .map(|path| tokio::spawn(write_loop(path, rx, write_lock.clone())));
        Self {
            path,
            tx,
            task,
            write_lock,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Queue a snapshot. Superseded snapshots are never written.
    pub fn persist(&self, model: PersistedModel) {
        self.tx.send_replace(Some(Arc::new(model)));
    }

    /// Write the latest snapshot now and wait for it.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        // Read under the lock so a queued older write can't land after this one.
        let Some(model) = self.tx.borrow().clone() else {
            return Ok(());
        };
        write_blocking(path, model).await
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn write_loop(
    path: PathBuf,
    mut rx: watch::Receiver<Option<Arc<PersistedModel>>>,
    write_lock: Arc<Mutex<()>>,
) {
    while rx.changed().await.is_ok() {
        let _guard = write_lock.lock().await;
        let latest = rx.borrow_and_update().clone();
        let Some(model) = latest else {
            continue;
        };
        if let Err(e) = write_blocking(path.clone(), model).await {
            warn!("Failed to persist model: {e}");
        }
    }
}

async fn write_blocking(path: PathBuf, model: Arc<PersistedModel>) -> Result<()> {
    tokio::task::spawn_blocking(move || save_model(&path, &model))
        .await
        .map_err(|e| Error::Persistence(format!("writer task failed: {e}")))?
}
