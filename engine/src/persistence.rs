//! Snapshot persistence. Saves are atomic: write to a temp file, fsync,
//! rotate the current snapshot to `.bak`, then rename the temp file
//! into place. Loading re-verifies every invariant and refuses corrupt
//! state so the operator can restore a backup instead of running on
//! garbage.

use crate::errors::{PersistenceError, StateError};
use crate::state::GameState;
use std::path::{Path, PathBuf};

/// File name of the canonical snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "gamestate.json";

fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

/// Serializes the state canonically. All engine maps are ordered, so
/// the same state always yields the same bytes.
pub fn encode_snapshot(state: &GameState) -> Result<String, PersistenceError> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Atomically writes the snapshot and rotates the previous one to `.bak`.
pub async fn save_snapshot(state: &GameState, data_dir: &Path) -> Result<(), PersistenceError> {
    let encoded = encode_snapshot(state)?;
    tokio::fs::create_dir_all(data_dir).await?;
    let target = snapshot_path(data_dir);
    let temp = data_dir.join(format!("{SNAPSHOT_FILE}.tmp"));

    let mut file = tokio::fs::File::create(&temp).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, encoded.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    if tokio::fs::try_exists(&target).await? {
        tokio::fs::rename(&target, data_dir.join(format!("{SNAPSHOT_FILE}.bak"))).await?;
    }
    tokio::fs::rename(&temp, &target).await?;
    tracing::debug!(path = %target.display(), "Snapshot saved.");
    Ok(())
}

/// Loads the snapshot if one exists. Invariant violations surface as
/// [`StateError::CorruptState`]; the server must not start on them.
pub async fn load_snapshot(data_dir: &Path) -> Result<Option<GameState>, PersistenceError> {
    let target = snapshot_path(data_dir);
    let text = match tokio::fs::read_to_string(&target).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: GameState = serde_json::from_str(&text)
        .map_err(|e| PersistenceError::State(StateError::CorruptState(e.to_string())))?;
    state
        .check_invariants()
        .map_err(|e| StateError::CorruptState(e.to_string()))?;
    Ok(Some(state))
}

/// Copies the current snapshot to a timestamped backup file, returning
/// the backup path.
pub async fn named_backup(data_dir: &Path) -> Result<PathBuf, PersistenceError> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let backup = data_dir.join(format!("{SNAPSHOT_FILE}.backup.{stamp}"));
    tokio::fs::copy(snapshot_path(data_dir), &backup).await?;
    Ok(backup)
}

/// Restores the snapshot from an arbitrary backup file after verifying
/// it parses and holds the invariants.
pub async fn restore_from(data_dir: &Path, backup: &Path) -> Result<(), PersistenceError> {
    let text = tokio::fs::read_to_string(backup).await?;
    let state: GameState = serde_json::from_str(&text)
        .map_err(|e| PersistenceError::State(StateError::CorruptState(e.to_string())))?;
    state
        .check_invariants()
        .map_err(|e| StateError::CorruptState(e.to_string()))?;
    save_snapshot(&state, data_dir).await
}
