//! Join preview
//!
//! Before a user irrevocably joins a group, compare the paired manifest
//! against the local directory (read-only) and report what each startup
//! conflict policy would do. The paired log is handed back inside a
//! [`PreparedSession`] so proceeding does not redo the handshake.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::error::SyncError;
use crate::exclusion::ExclusionRules;
use crate::hashing;
use crate::log::ManifestLog;
use crate::logging::*;
use crate::manifest::ManifestValue;
use crate::paths;

/// At most this many example paths are kept per category
pub const SAMPLE_LIMIT: usize = 10;

const HASH_CONCURRENCY: usize = 8;

/// How local files relate to the remote manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
	/// Manifest file with no local counterpart
	pub remote_only: usize,

	/// Local hash equals the manifest hash
	pub matching: usize,

	/// Local hash differs from the manifest hash
	pub file_conflicts: usize,

	/// Manifest tombstone whose path exists locally
	pub tombstone_conflicts: usize,

	/// Local file the manifest does not know
	pub local_only: usize,
}

/// Up to [`SAMPLE_LIMIT`] example paths per category
#[derive(Debug, Clone, Default)]
pub struct CategorySamples {
	pub remote_only: Vec<String>,
	pub matching: Vec<String>,
	pub file_conflicts: Vec<String>,
	pub tombstone_conflicts: Vec<String>,
	pub local_only: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteWinsImpact {
	pub overwrites: usize,
	pub deletes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalWinsImpact {
	pub uploads: usize,
	pub conflict_copies: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepBothImpact {
	pub conflict_copies: usize,
}

/// What each policy would do to the conflicting paths
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyImpact {
	pub remote_wins: RemoteWinsImpact,
	pub local_wins: LocalWinsImpact,
	pub keep_both: KeepBothImpact,
}

/// Result of a join preview
#[derive(Debug, Clone, Default)]
pub struct JoinAnalysis {
	pub counts: CategoryCounts,
	pub samples: CategorySamples,
	pub impact: PolicyImpact,
}

/// A paired manifest plus its analysis, ready to hand to engine startup
pub struct PreparedSession {
	pub manifest: Arc<dyn ManifestLog>,
	pub analysis: JoinAnalysis,
}

/// Analyze a paired manifest against the directory at `root`
pub async fn preview_join(
	manifest: Arc<dyn ManifestLog>,
	root: &Path,
	rules: Arc<ExclusionRules>,
) -> Result<PreparedSession, SyncError> {
	let local = hash_local_files(root, rules).await?;
	let analysis = analyze(manifest.as_ref(), &local).await?;
	Ok(PreparedSession { manifest, analysis })
}

/// Collect canonical keys of every file under `root`, honoring exclusions
pub async fn scan_local_keys(
	root: &Path,
	rules: Arc<ExclusionRules>,
) -> Result<Vec<String>, SyncError> {
	let root = root.to_path_buf();
	tokio::task::spawn_blocking(move || {
		let mut keys = Vec::new();
		for entry in ignore::WalkBuilder::new(&root).standard_filters(false).build() {
			let entry = match entry {
				Ok(entry) => entry,
				Err(e) => {
					warn!("scan error: {}", e);
					continue;
				}
			};
			if !entry.file_type().is_some_and(|file_type| file_type.is_file()) {
				continue;
			}
			let rel = match entry.path().strip_prefix(&root) {
				Ok(rel) => rel,
				Err(_) => continue,
			};
			let key = match paths::canonicalize(rel) {
				Ok(key) => key,
				Err(_) => continue,
			};
			if rules.is_excluded(&key) {
				continue;
			}
			keys.push(key);
		}
		keys.sort();
		Ok(keys)
	})
	.await
	.map_err(|e| SyncError::Other { message: format!("scan task: {}", e) })?
}

/// Hash every local file into a `key -> hash` map with bounded concurrency
pub(crate) async fn hash_local_files(
	root: &Path,
	rules: Arc<ExclusionRules>,
) -> Result<BTreeMap<String, String>, SyncError> {
	let keys = scan_local_keys(root, rules).await?;
	let results: Vec<Result<(String, String), SyncError>> =
		stream::iter(keys.into_iter().map(|key| {
			let file = paths::fs_path(root, &key);
			async move {
				let bytes = tokio::fs::read(&file).await?;
				Ok((key, hashing::sha256_hex(&bytes)))
			}
		}))
		.buffer_unordered(HASH_CONCURRENCY)
		.collect()
		.await;

	let mut map = BTreeMap::new();
	for result in results {
		match result {
			Ok((key, hash)) => {
				map.insert(key, hash);
			}
			// A file vanishing mid-preview is not fatal to a read-only scan
			Err(e) => warn!("preview hash failed: {}", e),
		}
	}
	Ok(map)
}

fn push_sample(samples: &mut Vec<String>, key: &str) {
	if samples.len() < SAMPLE_LIMIT {
		samples.push(key.to_string());
	}
}

async fn analyze(
	manifest: &dyn ManifestLog,
	local: &BTreeMap<String, String>,
) -> Result<JoinAnalysis, SyncError> {
	let mut counts = CategoryCounts::default();
	let mut samples = CategorySamples::default();
	let mut seen: BTreeSet<&str> = BTreeSet::new();

	for (key, raw) in manifest.list().await? {
		if key.starts_with("__") {
			continue;
		}
		let value = match ManifestValue::parse(&key, &raw) {
			Ok(value) => value,
			Err(e) => {
				warn!("skipping malformed manifest entry {}: {}", key, e);
				continue;
			}
		};
		match value {
			ManifestValue::File(file) => match local.get_key_value(&key) {
				None => {
					counts.remote_only += 1;
					push_sample(&mut samples.remote_only, &key);
				}
				Some((local_key, local_hash)) if *local_hash == file.hash => {
					counts.matching += 1;
					push_sample(&mut samples.matching, &key);
					seen.insert(local_key.as_str());
				}
				Some((local_key, _)) => {
					counts.file_conflicts += 1;
					push_sample(&mut samples.file_conflicts, &key);
					seen.insert(local_key.as_str());
				}
			},
			ManifestValue::Tombstone(_) => {
				if let Some((local_key, _)) = local.get_key_value(&key) {
					counts.tombstone_conflicts += 1;
					push_sample(&mut samples.tombstone_conflicts, &key);
					seen.insert(local_key.as_str());
				}
			}
			ManifestValue::Peer(_) | ManifestValue::Config(_) => {}
		}
	}

	for key in local.keys() {
		if !seen.contains(key.as_str()) {
			counts.local_only += 1;
			push_sample(&mut samples.local_only, key);
		}
	}

	let impact = PolicyImpact {
		remote_wins: RemoteWinsImpact {
			overwrites: counts.file_conflicts,
			deletes: counts.tombstone_conflicts,
		},
		local_wins: LocalWinsImpact {
			uploads: counts.file_conflicts,
			conflict_copies: counts.tombstone_conflicts,
		},
		keep_both: KeepBothImpact {
			conflict_copies: counts.file_conflicts + counts.tombstone_conflicts,
		},
	};

	Ok(JoinAnalysis { counts, samples, impact })
}

// vim: ts=4
