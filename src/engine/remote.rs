//! Remote-change handling: downloads, conflicts and tombstones
//!
//! One reconcile pass walks the current manifest snapshot. Records written by
//! this peer are skipped; everything else is compared against the on-disk
//! bytes and the tracking entry to decide between fast-forward download,
//! conflict copy, tombstone application or nothing at all.

use std::io;

use super::{locked, EngineShared};
use crate::conflict;
use crate::error::SyncError;
use crate::events::{EngineEvent, SyncDirection, SyncKind};
use crate::hashing;
use crate::logging::*;
use crate::manifest::{FileRecord, ManifestValue, StartupPolicy, TombstoneRecord};
use crate::paths;
use crate::store::TrackedEntry;

pub(super) async fn reconcile_all_remotes(shared: &EngineShared) -> Result<(), SyncError> {
	// A startup policy only governs the first pass
	let policy = locked(&shared.startup_policy).take();
	let mut affected: Vec<String> = Vec::new();

	for (key, raw) in shared.manifest.list().await? {
		if key.starts_with("__") {
			continue;
		}
		let value = match ManifestValue::parse(&key, &raw) {
			Ok(value) => value,
			Err(e) => {
				shared.report_error(&format!("manifest entry {}", key), &e.into());
				continue;
			}
		};
		let result = match value {
			ManifestValue::File(remote) if remote.writer_key != shared.writer_key => {
				handle_remote_update(shared, &key, &remote, policy, &mut affected).await
			}
			ManifestValue::Tombstone(tomb) if tomb.writer_key != shared.writer_key => {
				apply_tombstone(shared, &key, &tomb).await
			}
			_ => Ok(()),
		};
		if let Err(e) = result {
			shared.report_error(&format!("reconcile {}", key), &e);
		}
	}

	if let Some(policy) = policy {
		info!("startup policy {} touched {} paths", policy, affected.len());
		shared.events.emit(EngineEvent::Audit { policy, affected_paths: affected });
	}
	Ok(())
}

async fn handle_remote_update(
	shared: &EngineShared,
	key: &str,
	remote: &FileRecord,
	policy: Option<StartupPolicy>,
	affected: &mut Vec<String>,
) -> Result<(), SyncError> {
	let file = paths::fs_path(&shared.root, key);
	let local_bytes = match tokio::fs::read(&file).await {
		Ok(bytes) => Some(bytes),
		Err(e) if e.kind() == io::ErrorKind::NotFound => None,
		Err(e) => return Err(e.into()),
	};

	let Some(local_bytes) = local_bytes else {
		return download(shared, key, remote).await;
	};
	let local_hash = hashing::sha256_hex(&local_bytes);
	if local_hash == remote.hash {
		// Bytes already agree; align tracking with the manifest
		let mtime = tokio::fs::metadata(&file)
			.await
			.map(|meta| super::local_mtime_ms(&meta))
			.unwrap_or(remote.mtime);
		let entry = TrackedEntry {
			last_synced_hash: local_hash,
			last_synced_mtime: mtime,
			last_manifest_hash: remote.hash.clone(),
			last_manifest_writer_key: remote.writer_key.clone(),
		};
		if shared.store.get(key).as_ref() != Some(&entry) {
			if let Err(e) = shared.store.set(key, entry).await {
				shared.report_state_error("persist tracking", e);
			}
		}
		return Ok(());
	}

	// The pair differs; a user-selected startup policy overrides the
	// hash-and-base reasoning below for this one pass.
	if let Some(policy) = policy {
		affected.push(key.to_string());
		match policy {
			StartupPolicy::LocalWins => {
				// Publish local bytes as a successor of the remote record
				return super::local::publish_update(shared, key, false).await;
			}
			StartupPolicy::KeepBoth => {
				return conflict_and_download(shared, key, remote, &local_bytes).await;
			}
			// remote-wins proceeds exactly as a normal pass
			StartupPolicy::RemoteWins => {}
		}
	}

	let Some(tracked) = shared.store.get(key) else {
		// First sight of this path
		return download(shared, key, remote).await;
	};
	if remote.hash == tracked.last_manifest_hash {
		// Remote unchanged since we last aligned; nothing to do
		return Ok(());
	}
	if local_hash == tracked.last_synced_hash {
		// We did not edit; accept the newer remote version
		return download(shared, key, remote).await;
	}
	if remote.base_hash.as_deref() == Some(local_hash.as_str()) {
		// Remote forks from exactly our bytes: fast-forward
		return download(shared, key, remote).await;
	}
	conflict_and_download(shared, key, remote, &local_bytes).await
}

/// Fetch the remote blocks, verify the hash, materialize the file and align
/// tracking with the manifest record.
async fn download(shared: &EngineShared, key: &str, remote: &FileRecord) -> Result<(), SyncError> {
	let blocks = shared
		.blocks
		.read_blocks(&remote.writer_key, remote.blocks.offset, remote.blocks.length)
		.await?;
	let mut bytes = Vec::with_capacity(remote.size as usize);
	for block in &blocks {
		bytes.extend_from_slice(block);
	}
	let hash = hashing::sha256_hex(&bytes);
	if hash != remote.hash {
		return Err(SyncError::HashMismatch { expected: remote.hash.clone(), actual: hash });
	}

	let file = paths::fs_path(&shared.root, key);
	if let Some(parent) = file.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	shared.suppress(key);
	if let Err(e) = tokio::fs::write(&file, &bytes).await {
		shared.unsuppress(key);
		return Err(e.into());
	}

	let entry = TrackedEntry {
		last_synced_hash: remote.hash.clone(),
		last_synced_mtime: remote.mtime,
		last_manifest_hash: remote.hash.clone(),
		last_manifest_writer_key: remote.writer_key.clone(),
	};
	if let Err(e) = shared.store.set(key, entry).await {
		shared.report_state_error("persist tracking", e);
	}
	if let Some(cache) = &shared.cache {
		if let Ok(meta) = tokio::fs::metadata(&file).await {
			let _ = cache.record(key, meta.len(), super::local_mtime_ms(&meta), &remote.hash);
		}
	}

	debug!("downloaded {} from {}", key, remote.writer_key);
	shared.events.emit(EngineEvent::Sync {
		direction: SyncDirection::RemoteToLocal,
		kind: SyncKind::Update,
		path: key.to_string(),
		conflict_path: None,
	});
	Ok(())
}

/// Preserve the losing local bytes under a conflict-copy name, then accept
/// the remote version at the original path.
async fn conflict_and_download(
	shared: &EngineShared,
	key: &str,
	remote: &FileRecord,
	local_bytes: &[u8],
) -> Result<(), SyncError> {
	let copy_key = conflict::conflict_path(
		key,
		conflict::short_peer(&shared.writer_key),
		chrono::Utc::now().date_naive(),
	);
	let copy_file = paths::fs_path(&shared.root, &copy_key);
	if let Some(parent) = copy_file.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	shared.suppress(&copy_key);
	if let Err(e) = tokio::fs::write(&copy_file, local_bytes).await {
		shared.unsuppress(&copy_key);
		return Err(e.into());
	}
	info!("kept local copy of {} as {}", key, copy_key);

	download(shared, key, remote).await?;

	shared.events.emit(EngineEvent::Sync {
		direction: SyncDirection::RemoteToLocal,
		kind: SyncKind::Conflict,
		path: key.to_string(),
		conflict_path: Some(copy_key),
	});
	Ok(())
}

/// Apply a remote tombstone.
///
/// Requires tracking to exist and the tombstone's baseHash to equal the
/// tracked lastSyncedHash; a tombstone based on a version we have superseded
/// must not delete the newer bytes. A local edit newer than the tracked hash
/// survives too: the live record we publish for the path supersedes the
/// tombstone.
async fn apply_tombstone(
	shared: &EngineShared,
	key: &str,
	tomb: &TombstoneRecord,
) -> Result<(), SyncError> {
	let Some(tracked) = shared.store.get(key) else {
		return Ok(());
	};
	if tomb.base_hash.as_deref() != Some(tracked.last_synced_hash.as_str()) {
		debug!("ignoring stale tombstone for {}", key);
		return Ok(());
	}

	let file = paths::fs_path(&shared.root, key);
	match tokio::fs::read(&file).await {
		Ok(bytes) => {
			if hashing::sha256_hex(&bytes) != tracked.last_synced_hash {
				debug!("edit wins over delete for {}", key);
				return Ok(());
			}
			shared.suppress(key);
			if let Err(e) = tokio::fs::remove_file(&file).await {
				shared.unsuppress(key);
				if e.kind() != io::ErrorKind::NotFound {
					return Err(e.into());
				}
			}
		}
		Err(e) if e.kind() == io::ErrorKind::NotFound => {}
		Err(e) => return Err(e.into()),
	}

	if let Err(e) = shared.store.remove(key).await {
		shared.report_state_error("remove tracking", e);
	}
	if let Some(cache) = &shared.cache {
		let _ = cache.forget(key);
	}

	debug!("applied tombstone for {}", key);
	shared.events.emit(EngineEvent::Sync {
		direction: SyncDirection::RemoteToLocal,
		kind: SyncKind::Delete,
		path: key.to_string(),
		conflict_path: None,
	});
	Ok(())
}

// vim: ts=4
