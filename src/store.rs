//! Persistent per-path tracking state
//!
//! The engine's memory of what it believed at the moment it last wrote to, or
//! accepted from, disk for each path. Advisory and never replicated: losing
//! it degrades to remote-wins behavior but never corrupts.
//!
//! Durability protocol: every mutation snapshots the whole map and enqueues a
//! persist on a single-writer queue. Each persist writes the primary through
//! a temp file rename, then mirrors to a backup the same way. Load prefers
//! the primary and falls back to the backup on not-found, syntactic or
//! schema failure; if both fail the store resets to empty and re-persists.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::StateError;
use crate::logging::*;

/// Primary state file name, under `<sync_root>/.pearsync/`
pub const STATE_FILE: &str = "state.json";

/// Mirror written after every successful primary write
pub const BACKUP_FILE: &str = "state.json.bak";

/// Tracking entry for a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrackedEntry {
	/// Hash of the bytes we last wrote to or accepted from disk
	pub last_synced_hash: String,

	/// Mtime (ms) associated with that acceptance
	pub last_synced_mtime: i64,

	/// Hash of the manifest record we last aligned with
	pub last_manifest_hash: String,

	/// Writer that produced that manifest record
	pub last_manifest_writer_key: String,
}

type StateMap = BTreeMap<String, TrackedEntry>;

struct PersistJob {
	snapshot: StateMap,
	ack: oneshot::Sender<Result<(), StateError>>,
}

/// Durable `path -> TrackedEntry` map
pub struct LocalStateStore {
	entries: Mutex<StateMap>,
	persist_tx: mpsc::UnboundedSender<PersistJob>,
	_worker: JoinHandle<()>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum ReadFailure {
	Recoverable(String),
	Fatal(StateError),
}

async fn read_state_file(path: &Path) -> Result<StateMap, ReadFailure> {
	let raw = match fs::read_to_string(path).await {
		Ok(raw) => raw,
		Err(e) if e.kind() == io::ErrorKind::NotFound => {
			return Err(ReadFailure::Recoverable("not found".to_string()))
		}
		Err(e) => return Err(ReadFailure::Fatal(StateError::LoadFailed { source: Box::new(e) })),
	};
	serde_json::from_str(&raw).map_err(|e| ReadFailure::Recoverable(e.to_string()))
}

fn save_failed<E: std::error::Error + Send + Sync + 'static>(e: E) -> StateError {
	StateError::SaveFailed { source: Box::new(e) }
}

async fn persist_snapshot(
	dir: &Path,
	counter: u64,
	snapshot: &StateMap,
) -> Result<(), StateError> {
	let json = serde_json::to_string_pretty(snapshot).map_err(save_failed)?;

	let primary_tmp = dir.join(format!("{}.{}.tmp", STATE_FILE, counter));
	fs::write(&primary_tmp, &json).await.map_err(save_failed)?;
	fs::rename(&primary_tmp, dir.join(STATE_FILE)).await.map_err(save_failed)?;

	let backup_tmp = dir.join(format!("{}.{}.tmp", BACKUP_FILE, counter));
	fs::write(&backup_tmp, &json).await.map_err(save_failed)?;
	fs::rename(&backup_tmp, dir.join(BACKUP_FILE)).await.map_err(save_failed)?;

	Ok(())
}

async fn persist_worker(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<PersistJob>) {
	// Counter is owned by this instance's worker; it only disambiguates
	// temp-file names within one process lifetime.
	let mut counter: u64 = 0;
	while let Some(job) = rx.recv().await {
		counter += 1;
		let result = persist_snapshot(&dir, counter, &job.snapshot).await;
		if let Err(ref e) = result {
			error!("state persist failed: {}", e);
		}
		let _ = job.ack.send(result);
	}
}

impl LocalStateStore {
	/// Load (or initialize) the store rooted at `dir`
	pub async fn load(dir: &Path) -> Result<Self, StateError> {
		fs::create_dir_all(dir)
			.await
			.map_err(|e| StateError::LoadFailed { source: Box::new(e) })?;

		let mut recovered = false;
		let map = match read_state_file(&dir.join(STATE_FILE)).await {
			Ok(map) => map,
			Err(ReadFailure::Fatal(e)) => return Err(e),
			Err(ReadFailure::Recoverable(reason)) => {
				warn!("state file unusable ({}), trying backup", reason);
				recovered = true;
				match read_state_file(&dir.join(BACKUP_FILE)).await {
					Ok(map) => map,
					Err(ReadFailure::Fatal(e)) => return Err(e),
					Err(ReadFailure::Recoverable(reason)) => {
						warn!("backup unusable ({}), resetting tracking state", reason);
						StateMap::new()
					}
				}
			}
		};

		let (persist_tx, persist_rx) = mpsc::unbounded_channel();
		let worker = tokio::spawn(persist_worker(dir.to_path_buf(), persist_rx));
		let store = LocalStateStore { entries: Mutex::new(map), persist_tx, _worker: worker };
		if recovered {
			store.flush().await?;
		}
		Ok(store)
	}

	pub fn get(&self, path: &str) -> Option<TrackedEntry> {
		locked(&self.entries).get(path).cloned()
	}

	pub fn has(&self, path: &str) -> bool {
		locked(&self.entries).contains_key(path)
	}

	pub fn paths(&self) -> Vec<String> {
		locked(&self.entries).keys().cloned().collect()
	}

	/// Insert or replace the entry for `path` and persist.
	///
	/// On persist failure the in-memory map is already updated and stays
	/// authoritative until the next successful persist.
	pub async fn set(&self, path: &str, entry: TrackedEntry) -> Result<(), StateError> {
		let snapshot = {
			let mut entries = locked(&self.entries);
			entries.insert(path.to_string(), entry);
			entries.clone()
		};
		self.enqueue(snapshot).await
	}

	/// Remove the entry for `path` (no-op if absent) and persist
	pub async fn remove(&self, path: &str) -> Result<(), StateError> {
		let snapshot = {
			let mut entries = locked(&self.entries);
			if entries.remove(path).is_none() {
				return Ok(());
			}
			entries.clone()
		};
		self.enqueue(snapshot).await
	}

	/// Persist the current map as-is
	pub async fn flush(&self) -> Result<(), StateError> {
		let snapshot = locked(&self.entries).clone();
		self.enqueue(snapshot).await
	}

	async fn enqueue(&self, snapshot: StateMap) -> Result<(), StateError> {
		let (ack_tx, ack_rx) = oneshot::channel();
		self.persist_tx
			.send(PersistJob { snapshot, ack: ack_tx })
			.map_err(|_| StateError::QueueClosed)?;
		ack_rx.await.map_err(|_| StateError::QueueClosed)?
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(hash: &str) -> TrackedEntry {
		TrackedEntry {
			last_synced_hash: hash.to_string(),
			last_synced_mtime: 1_700_000_000_000,
			last_manifest_hash: hash.to_string(),
			last_manifest_writer_key: "aabb01".to_string(),
		}
	}

	#[tokio::test]
	async fn test_set_get_remove() {
		let dir = tempfile::tempdir().unwrap();
		let store = LocalStateStore::load(dir.path()).await.unwrap();

		store.set("/a.txt", entry("h1")).await.unwrap();
		assert!(store.has("/a.txt"));
		assert_eq!(store.get("/a.txt").unwrap().last_synced_hash, "h1");
		assert_eq!(store.paths(), vec!["/a.txt".to_string()]);

		store.remove("/a.txt").await.unwrap();
		assert!(!store.has("/a.txt"));
		assert!(store.get("/a.txt").is_none());
	}

	#[tokio::test]
	async fn test_persists_across_reload() {
		let dir = tempfile::tempdir().unwrap();
		{
			let store = LocalStateStore::load(dir.path()).await.unwrap();
			store.set("/a.txt", entry("h1")).await.unwrap();
		}
		let reloaded = LocalStateStore::load(dir.path()).await.unwrap();
		assert_eq!(reloaded.get("/a.txt").unwrap().last_synced_hash, "h1");

		// Backup mirror exists alongside the primary
		assert!(dir.path().join(STATE_FILE).exists());
		assert!(dir.path().join(BACKUP_FILE).exists());
	}

	#[tokio::test]
	async fn test_remove_absent_is_noop() {
		let dir = tempfile::tempdir().unwrap();
		let store = LocalStateStore::load(dir.path()).await.unwrap();
		store.remove("/never").await.unwrap();
	}

	#[tokio::test]
	async fn test_rejects_unknown_entry_fields() {
		let dir = tempfile::tempdir().unwrap();
		let bogus = r#"{"/a.txt":{"lastSyncedHash":"h","lastSyncedMtime":1,"lastManifestHash":"h","lastManifestWriterKey":"k","extra":true}}"#;
		std::fs::write(dir.path().join(STATE_FILE), bogus).unwrap();

		// Schema failure on the primary with no backup resets to empty
		let store = LocalStateStore::load(dir.path()).await.unwrap();
		assert!(store.paths().is_empty());
	}
}

// vim: ts=4
