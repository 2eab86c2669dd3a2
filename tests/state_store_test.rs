//! Crash-recovery matrix for the local tracking store
//!
//! The store must prefer the primary state file, fall back to the backup
//! mirror when the primary is unreadable, and reset to empty only when both
//! are unusable.

use std::fs;

use tempfile::TempDir;

use pearsync::store::{LocalStateStore, TrackedEntry, BACKUP_FILE, STATE_FILE};

fn entry(hash: &str) -> TrackedEntry {
	TrackedEntry {
		last_synced_hash: hash.to_string(),
		last_synced_mtime: 1_700_000_000_000,
		last_manifest_hash: hash.to_string(),
		last_manifest_writer_key: "aabb01".to_string(),
	}
}

fn valid_state_json(path: &str, hash: &str) -> String {
	format!(
		r#"{{"{}":{{"lastSyncedHash":"{}","lastSyncedMtime":1,"lastManifestHash":"{}","lastManifestWriterKey":"k1"}}}}"#,
		path, hash, hash
	)
}

#[tokio::test]
async fn test_both_sound_loads_primary() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join(STATE_FILE), valid_state_json("/p.txt", "primary")).unwrap();
	fs::write(dir.path().join(BACKUP_FILE), valid_state_json("/b.txt", "backup")).unwrap();

	let store = LocalStateStore::load(dir.path()).await.unwrap();
	assert!(store.has("/p.txt"));
	assert!(!store.has("/b.txt"));
}

#[tokio::test]
async fn test_corrupt_primary_falls_back_to_backup() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
	fs::write(dir.path().join(BACKUP_FILE), valid_state_json("/b.txt", "backup")).unwrap();

	let store = LocalStateStore::load(dir.path()).await.unwrap();
	assert_eq!(store.get("/b.txt").unwrap().last_synced_hash, "backup");

	// Recovery re-persists, healing the primary
	let raw = fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
	assert!(raw.contains("/b.txt"));
}

#[tokio::test]
async fn test_missing_primary_falls_back_to_backup() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join(BACKUP_FILE), valid_state_json("/b.txt", "backup")).unwrap();

	let store = LocalStateStore::load(dir.path()).await.unwrap();
	assert!(store.has("/b.txt"));
}

#[tokio::test]
async fn test_both_corrupt_resets_to_empty() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
	fs::write(dir.path().join(BACKUP_FILE), "[1,2,3]").unwrap();

	let store = LocalStateStore::load(dir.path()).await.unwrap();
	assert!(store.paths().is_empty());

	// The reset state is persisted immediately
	let raw = fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
	assert_eq!(raw.trim(), "{}");
}

#[tokio::test]
async fn test_schema_violation_is_recoverable() {
	let dir = TempDir::new().unwrap();
	// Entry missing required fields
	fs::write(dir.path().join(STATE_FILE), r#"{"/a.txt":{"lastSyncedHash":"h"}}"#).unwrap();
	fs::write(dir.path().join(BACKUP_FILE), valid_state_json("/a.txt", "good")).unwrap();

	let store = LocalStateStore::load(dir.path()).await.unwrap();
	assert_eq!(store.get("/a.txt").unwrap().last_synced_hash, "good");
}

#[tokio::test]
async fn test_mutations_survive_reload() {
	let dir = TempDir::new().unwrap();
	{
		let store = LocalStateStore::load(dir.path()).await.unwrap();
		store.set("/a.txt", entry("h1")).await.unwrap();
		store.set("/b.txt", entry("h2")).await.unwrap();
		store.remove("/a.txt").await.unwrap();
	}

	let store = LocalStateStore::load(dir.path()).await.unwrap();
	assert!(!store.has("/a.txt"));
	assert_eq!(store.get("/b.txt").unwrap().last_synced_hash, "h2");

	// No stray temp files after the rename dance
	for entry in fs::read_dir(dir.path()).unwrap().flatten() {
		let name = entry.file_name().to_string_lossy().to_string();
		assert!(!name.ends_with(".tmp"), "leftover temp file: {}", name);
	}
}

// vim: ts=4
