//! Local-change handling: watcher events and the startup walk
//!
//! A local update reads the bytes, appends them to the own block log and
//! publishes a manifest successor; a local delete of a tracked file publishes
//! a tombstone. Paths the engine itself just wrote are consumed as
//! suppression credits and never round-trip into the publish pipeline.

use std::io;

use super::{local_mtime_ms, now_ms, EngineShared};
use crate::error::SyncError;
use crate::events::{EngineEvent, SyncDirection, SyncKind};
use crate::hashing;
use crate::logging::*;
use crate::manifest::{self, FileRecord, ManifestValue};
use crate::paths;
use crate::preview;
use crate::store::TrackedEntry;
use crate::watcher::{ChangeKind, LocalChange};

pub(super) async fn handle_local_change(
	shared: &EngineShared,
	change: &LocalChange,
) -> Result<(), SyncError> {
	if paths::is_internal(&change.path) {
		return Ok(());
	}
	if shared.take_suppression(&change.path) {
		debug!("suppressed watcher event for {}", change.path);
		return Ok(());
	}
	match change.kind {
		ChangeKind::Update => publish_update(shared, &change.path, false).await,
		ChangeKind::Delete => publish_delete(shared, &change.path).await,
	}
}

/// Walk the sync root and publish anything the manifest does not already
/// carry at the current content. Runs after the first remote pass.
pub(super) async fn initial_scan(shared: &EngineShared) -> Result<(), SyncError> {
	let keys = preview::scan_local_keys(&shared.root, shared.rules.clone()).await?;
	debug!("initial scan found {} files", keys.len());
	for key in keys {
		if let Err(e) = publish_update(shared, &key, true).await {
			shared.report_error(&format!("initial publish {}", key), &e);
		}
	}
	Ok(())
}

/// Publish the on-disk bytes at `key` unless the manifest already carries
/// them. With `refresh_on_match` (the startup walk), a hash match still
/// refreshes the tracking entry.
pub(super) async fn publish_update(
	shared: &EngineShared,
	key: &str,
	refresh_on_match: bool,
) -> Result<(), SyncError> {
	let file = paths::fs_path(&shared.root, key);
	let meta = match tokio::fs::metadata(&file).await {
		Ok(meta) => meta,
		// Raced a delete; the delete event follows
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e.into()),
	};
	let stat_size = meta.len();
	let stat_mtime = local_mtime_ms(&meta);

	let prev = manifest::get_value(shared.manifest.as_ref(), key).await?;

	// A cache hit lets an unchanged file skip both the read and the hash
	let cached_hash = shared
		.cache
		.as_ref()
		.and_then(|cache| cache.lookup(key, stat_size, stat_mtime).ok().flatten());
	if let (Some(hash), Some(ManifestValue::File(current))) = (&cached_hash, &prev) {
		if current.hash == *hash {
			if refresh_on_match {
				refresh_tracking(shared, key, hash, stat_mtime, current).await;
			}
			return Ok(());
		}
	}

	let bytes = match tokio::fs::read(&file).await {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e.into()),
	};
	let hash = hashing::sha256_hex(&bytes);
	if let Some(cache) = &shared.cache {
		let _ = cache.record(key, stat_size, stat_mtime, &hash);
	}

	if let Some(ManifestValue::File(current)) = &prev {
		if current.hash == hash {
			if refresh_on_match {
				refresh_tracking(shared, key, &hash, stat_mtime, current).await;
			}
			return Ok(());
		}
	}

	let range = shared.blocks.append(hashing::split_blocks(&bytes)).await?;
	let (base_hash, seq) = manifest::successor_of(prev.as_ref());
	let record = FileRecord {
		size: bytes.len() as u64,
		mtime: stat_mtime,
		hash: hash.clone(),
		base_hash,
		seq,
		writer_key: shared.writer_key.clone(),
		blocks: range,
	};
	manifest::put_value(shared.manifest.as_ref(), key, &ManifestValue::File(record)).await?;

	let entry = TrackedEntry {
		last_synced_hash: hash.clone(),
		last_synced_mtime: stat_mtime,
		last_manifest_hash: hash,
		last_manifest_writer_key: shared.writer_key.clone(),
	};
	if let Err(e) = shared.store.set(key, entry).await {
		shared.report_state_error("persist tracking", e);
	}

	debug!("published {} seq={}", key, seq);
	shared.events.emit(EngineEvent::Sync {
		direction: SyncDirection::LocalToRemote,
		kind: SyncKind::Update,
		path: key.to_string(),
		conflict_path: None,
	});
	Ok(())
}

async fn refresh_tracking(
	shared: &EngineShared,
	key: &str,
	hash: &str,
	mtime: i64,
	current: &FileRecord,
) {
	let entry = TrackedEntry {
		last_synced_hash: hash.to_string(),
		last_synced_mtime: mtime,
		last_manifest_hash: current.hash.clone(),
		last_manifest_writer_key: current.writer_key.clone(),
	};
	if let Err(e) = shared.store.set(key, entry).await {
		shared.report_state_error("persist tracking", e);
	}
}

/// Publish a tombstone for a locally deleted file. Deleting an absent or
/// already-tombstoned path is a no-op.
pub(super) async fn publish_delete(shared: &EngineShared, key: &str) -> Result<(), SyncError> {
	match manifest::get_value(shared.manifest.as_ref(), key).await? {
		Some(ManifestValue::File(_)) => {}
		_ => return Ok(()),
	}
	let record =
		manifest::put_tombstone(shared.manifest.as_ref(), key, &shared.writer_key, now_ms())
			.await?;
	if let Err(e) = shared.store.remove(key).await {
		shared.report_state_error("remove tracking", e);
	}
	if let Some(cache) = &shared.cache {
		let _ = cache.forget(key);
	}

	debug!("tombstoned {} seq={}", key, record.seq);
	shared.events.emit(EngineEvent::Sync {
		direction: SyncDirection::LocalToRemote,
		kind: SyncKind::Delete,
		path: key.to_string(),
		conflict_path: None,
	});
	Ok(())
}

// vim: ts=4
