//! Typed manifest values and their wire schema
//!
//! The replicated log stores opaque strings; this module is the single place
//! that turns them into typed records and back. Every path/kind pairing is
//! enforced symmetrically: `serialize` refuses to produce a value that
//! `parse` would reject, and vice versa.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SyncError};
use crate::hashing;
use crate::log::ManifestLog;
use crate::paths::{self, KeyKind};

/// A contiguous block range in a writer's append-only log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
	pub offset: u64,
	pub length: u64,
}

/// A published version of a user file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
	pub size: u64,

	/// Milliseconds since epoch, filesystem-sourced when available
	pub mtime: i64,

	/// SHA-256 of the full content, lowercase hex
	pub hash: String,

	/// Hash of the predecessor the writer had when publishing, or None if
	/// created ex nihilo
	pub base_hash: Option<String>,

	/// Strictly increasing per path on each successor
	pub seq: u64,

	/// Identifies the block log that holds the bytes
	pub writer_key: String,

	pub blocks: BlockRange,
}

/// A published deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TombstoneRecord {
	pub deleted: bool,
	pub mtime: i64,
	pub writer_key: String,
	pub base_hash: Option<String>,
	pub seq: u64,
}

/// A peer's self-description; lives at `__peer:<writerKey>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
	pub writer_key: String,
	pub name: String,
	pub updated_at: i64,
}

/// Group-visible configuration; lives at `__config`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub peer_name: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sync_folder: Option<String>,

	/// Open settings map; recognized key: `startupConflictPolicy`
	#[serde(default)]
	pub settings: BTreeMap<String, serde_json::Value>,
}

impl ConfigRecord {
	pub const STARTUP_POLICY_KEY: &'static str = "startupConflictPolicy";

	pub fn startup_conflict_policy(&self) -> Option<StartupPolicy> {
		self.settings
			.get(Self::STARTUP_POLICY_KEY)
			.and_then(|value| serde_json::from_value(value.clone()).ok())
	}

	pub fn set_startup_conflict_policy(&mut self, policy: StartupPolicy) {
		self.settings.insert(
			Self::STARTUP_POLICY_KEY.to_string(),
			serde_json::Value::String(policy.to_string()),
		);
	}
}

/// Conflict policy applied during the first remote-reconcile pass after start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPolicy {
	#[serde(rename = "remote-wins")]
	RemoteWins,

	#[serde(rename = "local-wins")]
	LocalWins,

	#[serde(rename = "keep-both")]
	KeepBoth,
}

impl StartupPolicy {
	pub fn as_str(&self) -> &'static str {
		match self {
			StartupPolicy::RemoteWins => "remote-wins",
			StartupPolicy::LocalWins => "local-wins",
			StartupPolicy::KeepBoth => "keep-both",
		}
	}
}

impl fmt::Display for StartupPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Sum of every value the manifest can hold, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ManifestValue {
	File(FileRecord),
	Tombstone(TombstoneRecord),
	Peer(PeerRecord),
	Config(ConfigRecord),
}

const KNOWN_KINDS: [&str; 4] = ["file", "tombstone", "peer", "config"];

impl ManifestValue {
	pub fn kind(&self) -> &'static str {
		match self {
			ManifestValue::File(_) => "file",
			ManifestValue::Tombstone(_) => "tombstone",
			ManifestValue::Peer(_) => "peer",
			ManifestValue::Config(_) => "config",
		}
	}

	/// Parse and validate a wire value against its key
	pub fn parse(key: &str, raw: &str) -> Result<ManifestValue, SchemaError> {
		let probe: serde_json::Value = serde_json::from_str(raw)
			.map_err(|e| malformed(key, format!("not valid JSON: {}", e)))?;
		let kind = probe
			.get("kind")
			.and_then(|value| value.as_str())
			.ok_or_else(|| malformed(key, "missing kind".to_string()))?;
		if !KNOWN_KINDS.contains(&kind) {
			return Err(SchemaError::UnknownKind { kind: kind.to_string() });
		}
		let value: ManifestValue =
			serde_json::from_value(probe).map_err(|e| malformed(key, e.to_string()))?;
		value.check_compat(key)?;
		Ok(value)
	}

	/// Serialize for the wire, enforcing the same key compatibility as `parse`
	pub fn serialize(&self, key: &str) -> Result<String, SchemaError> {
		self.check_compat(key)?;
		serde_json::to_string(self).map_err(|e| malformed(key, e.to_string()))
	}

	/// Enforce the path/kind pairing and structural invariants
	pub fn check_compat(&self, key: &str) -> Result<(), SchemaError> {
		match (paths::classify(key)?, self) {
			(KeyKind::File, ManifestValue::File(file)) => {
				check_hash(key, &file.hash)?;
				check_base_hash(key, file.base_hash.as_deref())?;
				check_seq(key, file.seq)
			}
			(KeyKind::File, ManifestValue::Tombstone(tomb)) => {
				if !tomb.deleted {
					return Err(malformed(key, "tombstone with deleted=false".to_string()));
				}
				check_base_hash(key, tomb.base_hash.as_deref())?;
				check_seq(key, tomb.seq)
			}
			(KeyKind::Peer(embedded), ManifestValue::Peer(peer)) => {
				if embedded != peer.writer_key {
					return Err(SchemaError::PeerKeyMismatch {
						key: key.to_string(),
						writer_key: peer.writer_key.clone(),
					});
				}
				Ok(())
			}
			(KeyKind::Config, ManifestValue::Config(_)) => Ok(()),
			(_, value) => {
				Err(SchemaError::KindMismatch { key: key.to_string(), kind: value.kind() })
			}
		}
	}
}

fn malformed(key: &str, message: String) -> SchemaError {
	SchemaError::Malformed { key: key.to_string(), message }
}

fn check_hash(key: &str, hash: &str) -> Result<(), SchemaError> {
	if hashing::is_hash_hex(hash) {
		Ok(())
	} else {
		Err(malformed(key, format!("not a SHA-256 hex digest: {}", hash)))
	}
}

fn check_base_hash(key: &str, base_hash: Option<&str>) -> Result<(), SchemaError> {
	match base_hash {
		Some(hash) => check_hash(key, hash),
		None => Ok(()),
	}
}

fn check_seq(key: &str, seq: u64) -> Result<(), SchemaError> {
	if seq >= 1 {
		Ok(())
	} else {
		Err(malformed(key, "seq must be >= 1".to_string()))
	}
}

/// baseHash and seq for the successor of `prev` at a user path.
///
/// A file predecessor contributes its own hash; a tombstone propagates its
/// baseHash; no predecessor means a fresh record.
pub fn successor_of(prev: Option<&ManifestValue>) -> (Option<String>, u64) {
	match prev {
		Some(ManifestValue::File(file)) => (Some(file.hash.clone()), file.seq + 1),
		Some(ManifestValue::Tombstone(tomb)) => (tomb.base_hash.clone(), tomb.seq + 1),
		_ => (None, 1),
	}
}

/// Read and parse the current record at `key`
pub async fn get_value(
	log: &dyn ManifestLog,
	key: &str,
) -> Result<Option<ManifestValue>, SyncError> {
	match log.get(key).await? {
		Some(raw) => Ok(Some(ManifestValue::parse(key, &raw)?)),
		None => Ok(None),
	}
}

/// Validate and publish a record. Reserved-key misuse and peer-key
/// mismatches are rejected before any bytes land in the log.
pub async fn put_value(
	log: &dyn ManifestLog,
	key: &str,
	value: &ManifestValue,
) -> Result<(), SyncError> {
	let raw = value.serialize(key).map_err(|e| match e {
		e @ (SchemaError::InvalidKey { .. } | SchemaError::PeerKeyMismatch { .. }) => {
			SyncError::PolicyViolation { message: e.to_string() }
		}
		e => SyncError::Schema(e),
	})?;
	log.put(key, &raw).await
}

/// Publish a tombstone for `key`, deriving baseHash and seq from whatever
/// record is current: a file contributes its hash, an older tombstone
/// propagates its baseHash, and an absent record yields a fresh deletion.
pub async fn put_tombstone(
	log: &dyn ManifestLog,
	key: &str,
	writer_key: &str,
	mtime: i64,
) -> Result<TombstoneRecord, SyncError> {
	let prev = get_value(log, key).await?;
	let (base_hash, seq) = successor_of(prev.as_ref());
	let record = TombstoneRecord {
		deleted: true,
		mtime,
		writer_key: writer_key.to_string(),
		base_hash,
		seq,
	};
	put_value(log, key, &ManifestValue::Tombstone(record.clone())).await?;
	Ok(record)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hashing::sha256_hex;

	fn file_record(writer: &str) -> FileRecord {
		FileRecord {
			size: 2,
			mtime: 1_700_000_000_000,
			hash: sha256_hex(b"hi"),
			base_hash: None,
			seq: 1,
			writer_key: writer.to_string(),
			blocks: BlockRange { offset: 0, length: 1 },
		}
	}

	#[test]
	fn test_file_round_trip() {
		let value = ManifestValue::File(file_record("aabb01"));
		let wire = value.serialize("/a.txt").unwrap();
		assert_eq!(ManifestValue::parse("/a.txt", &wire).unwrap(), value);
	}

	#[test]
	fn test_tombstone_round_trip() {
		let value = ManifestValue::Tombstone(TombstoneRecord {
			deleted: true,
			mtime: 1,
			writer_key: "aabb01".to_string(),
			base_hash: Some(sha256_hex(b"old")),
			seq: 2,
		});
		let wire = value.serialize("/a.txt").unwrap();
		assert_eq!(ManifestValue::parse("/a.txt", &wire).unwrap(), value);
	}

	#[test]
	fn test_peer_round_trip() {
		let value = ManifestValue::Peer(PeerRecord {
			writer_key: "aabb01".to_string(),
			name: "laptop".to_string(),
			updated_at: 5,
		});
		let wire = value.serialize("__peer:aabb01").unwrap();
		assert_eq!(ManifestValue::parse("__peer:aabb01", &wire).unwrap(), value);
	}

	#[test]
	fn test_config_round_trip() {
		let mut config = ConfigRecord::default();
		config.peer_name = Some("laptop".to_string());
		config.set_startup_conflict_policy(StartupPolicy::KeepBoth);
		let value = ManifestValue::Config(config.clone());
		let wire = value.serialize("__config").unwrap();
		assert_eq!(ManifestValue::parse("__config", &wire).unwrap(), value);
		assert_eq!(config.startup_conflict_policy(), Some(StartupPolicy::KeepBoth));
	}

	#[test]
	fn test_kind_mismatch_rejected_both_ways() {
		let file = ManifestValue::File(file_record("aabb01"));
		assert!(file.serialize("__config").is_err());
		let wire = file.serialize("/a.txt").unwrap();
		assert!(ManifestValue::parse("__config", &wire).is_err());
		assert!(ManifestValue::parse("__peer:aabb01", &wire).is_err());
	}

	#[test]
	fn test_peer_key_mismatch_rejected() {
		let value = ManifestValue::Peer(PeerRecord {
			writer_key: "aabb01".to_string(),
			name: "laptop".to_string(),
			updated_at: 5,
		});
		let err = value.serialize("__peer:ccdd02").unwrap_err();
		assert!(matches!(err, SchemaError::PeerKeyMismatch { .. }));
	}

	#[test]
	fn test_unknown_kind_rejected() {
		let raw = r#"{"kind":"directory","path":"/a"}"#;
		let err = ManifestValue::parse("/a", raw).unwrap_err();
		assert!(matches!(err, SchemaError::UnknownKind { .. }));
	}

	#[test]
	fn test_reserved_key_rejected() {
		let value = ManifestValue::File(file_record("aabb01"));
		assert!(value.serialize("__secret").is_err());
	}

	#[test]
	fn test_bad_hash_rejected() {
		let mut record = file_record("aabb01");
		record.hash = "zz".to_string();
		let value = ManifestValue::File(record);
		assert!(value.serialize("/a.txt").is_err());
	}

	#[test]
	fn test_zero_seq_rejected() {
		let mut record = file_record("aabb01");
		record.seq = 0;
		assert!(ManifestValue::File(record).serialize("/a.txt").is_err());
	}

	#[test]
	fn test_false_tombstone_rejected() {
		let value = ManifestValue::Tombstone(TombstoneRecord {
			deleted: false,
			mtime: 1,
			writer_key: "aabb01".to_string(),
			base_hash: None,
			seq: 1,
		});
		assert!(value.serialize("/a.txt").is_err());
	}

	#[test]
	fn test_successor_of_file_and_tombstone() {
		let file = ManifestValue::File(file_record("aabb01"));
		let (base, seq) = successor_of(Some(&file));
		assert_eq!(base.as_deref(), Some(sha256_hex(b"hi").as_str()));
		assert_eq!(seq, 2);

		let tomb = ManifestValue::Tombstone(TombstoneRecord {
			deleted: true,
			mtime: 1,
			writer_key: "aabb01".to_string(),
			base_hash: Some(sha256_hex(b"old")),
			seq: 3,
		});
		let (base, seq) = successor_of(Some(&tomb));
		assert_eq!(base.as_deref(), Some(sha256_hex(b"old").as_str()));
		assert_eq!(seq, 4);

		assert_eq!(successor_of(None), (None, 1));
	}
}

// vim: ts=4
