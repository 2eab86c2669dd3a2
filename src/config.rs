//! Engine configuration
//!
//! A small TOML-backed config with serde defaults. The group-visible subset
//! (peer name, effective startup policy) is republished to the manifest
//! `__config` key by the engine at start; everything here is local input.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::manifest::StartupPolicy;

/// Local engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
	/// Directory to keep in sync
	pub sync_folder: PathBuf,

	/// Human-readable peer name; defaults to the short writer key
	pub peer_name: Option<String>,

	/// Conflict policy for the first reconcile pass after joining
	pub startup_conflict_policy: Option<StartupPolicy>,

	/// Glob patterns excluded from sync, e.g. `*.tmp`, `target/**`
	pub exclude_patterns: Vec<String>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			sync_folder: PathBuf::from("."),
			peer_name: None,
			startup_conflict_policy: None,
			exclude_patterns: Vec::new(),
		}
	}
}

impl EngineConfig {
	/// Load configuration from a TOML file
	pub fn load_toml(path: &Path) -> Result<Self, SyncError> {
		let raw = std::fs::read_to_string(path)?;
		toml::from_str(&raw).map_err(|e| SyncError::InvalidConfig {
			message: format!("{}: {}", path.display(), e),
		})
	}
}


// vim: ts=4
