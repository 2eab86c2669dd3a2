//! Sync exclusion rules
//!
//! The engine-owned `/.pearsync/**` subtree is always excluded; users can add
//! glob patterns on top (matched against the root-relative path without the
//! leading slash, e.g. `*.tmp` or `target/**`).

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::SyncError;
use crate::paths;

pub struct ExclusionRules {
	set: GlobSet,
}

impl ExclusionRules {
	/// Compile user glob patterns into a rule set
	pub fn new(patterns: &[String]) -> Result<Self, SyncError> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			let glob = Glob::new(pattern).map_err(|e| SyncError::InvalidConfig {
				message: format!("bad exclude pattern {}: {}", pattern, e),
			})?;
			builder.add(glob);
		}
		let set = builder
			.build()
			.map_err(|e| SyncError::InvalidConfig { message: e.to_string() })?;
		Ok(ExclusionRules { set })
	}

	/// Rules with no user patterns (the internal subtree is still excluded)
	pub fn none() -> Self {
		ExclusionRules { set: GlobSet::empty() }
	}

	/// Should this canonical key stay out of the sync pipeline?
	pub fn is_excluded(&self, key: &str) -> bool {
		paths::is_internal(key) || self.set.is_match(key.trim_start_matches('/'))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_internal_always_excluded() {
		let rules = ExclusionRules::none();
		assert!(rules.is_excluded("/.pearsync/state.json"));
		assert!(rules.is_excluded("/.pearsync"));
		assert!(!rules.is_excluded("/a.txt"));
	}

	#[test]
	fn test_user_patterns() {
		let rules =
			ExclusionRules::new(&["*.tmp".to_string(), "target/**".to_string()]).unwrap();
		assert!(rules.is_excluded("/scratch.tmp"));
		assert!(rules.is_excluded("/target/debug/out"));
		assert!(!rules.is_excluded("/src/main.rs"));
	}

	#[test]
	fn test_bad_pattern_rejected() {
		assert!(ExclusionRules::new(&["a{".to_string()]).is_err());
	}
}

// vim: ts=4
