//! Path canonicalization and manifest key classification
//!
//! Every manifest key is either a user file path ("/"-prefixed, forward-slash
//! separated), the group config key `__config`, or a peer record key
//! `__peer:<writerKey>`. Anything else is rejected before it reaches the log.

use std::path::{Component, Path, PathBuf};

use crate::error::SchemaError;

/// Key holding the group-visible configuration record
pub const CONFIG_KEY: &str = "__config";

/// Prefix of per-peer self-description keys
pub const PEER_PREFIX: &str = "__peer:";

/// Name of the engine-owned directory inside the sync root
pub const INTERNAL_DIR: &str = ".pearsync";

/// Classification of a manifest key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind<'a> {
	/// A user file path such as `/docs/a.txt`
	File,

	/// A peer record key; the embedded writer key is returned
	Peer(&'a str),

	/// The group config key
	Config,
}

/// Classify a manifest key, rejecting anything outside the three known shapes
pub fn classify(key: &str) -> Result<KeyKind<'_>, SchemaError> {
	if key == CONFIG_KEY {
		return Ok(KeyKind::Config);
	}
	if let Some(writer_key) = key.strip_prefix(PEER_PREFIX) {
		if writer_key.is_empty() || !writer_key.bytes().all(|b| b.is_ascii_hexdigit()) {
			return Err(SchemaError::InvalidKey { key: key.to_string() });
		}
		return Ok(KeyKind::Peer(writer_key));
	}
	if key.starts_with("__") {
		// Reserved namespace with no known meaning
		return Err(SchemaError::InvalidKey { key: key.to_string() });
	}
	if is_canonical_file_key(key) {
		return Ok(KeyKind::File);
	}
	Err(SchemaError::InvalidKey { key: key.to_string() })
}

/// Check that a user-file key is in canonical form: leading slash, no empty,
/// `.` or `..` segments, no trailing slash.
pub fn is_canonical_file_key(key: &str) -> bool {
	match key.strip_prefix('/') {
		None => false,
		Some("") => false,
		Some(rest) => rest.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != ".."),
	}
}

/// Canonicalize an OS-native path relative to the sync root into a manifest
/// key. Rejects absolute paths and anything that would escape the root.
pub fn canonicalize(rel: &Path) -> Result<String, SchemaError> {
	let mut segments: Vec<&str> = Vec::new();
	for component in rel.components() {
		match component {
			Component::Normal(seg) => match seg.to_str() {
				Some(seg) => segments.push(seg),
				None => {
					return Err(SchemaError::InvalidKey {
						key: rel.to_string_lossy().into_owned(),
					})
				}
			},
			Component::CurDir => {}
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(SchemaError::InvalidKey { key: rel.to_string_lossy().into_owned() })
			}
		}
	}
	if segments.is_empty() {
		return Err(SchemaError::InvalidKey { key: rel.to_string_lossy().into_owned() });
	}
	Ok(format!("/{}", segments.join("/")))
}

/// True for keys inside the engine-owned `/.pearsync/` subtree
pub fn is_internal(key: &str) -> bool {
	key == format!("/{}", INTERNAL_DIR) || key.starts_with(&format!("/{}/", INTERNAL_DIR))
}

/// Map a canonical user-file key back to a filesystem path under `root`
pub fn fs_path(root: &Path, key: &str) -> PathBuf {
	let mut path = root.to_path_buf();
	for seg in key.split('/').filter(|seg| !seg.is_empty()) {
		path.push(seg);
	}
	path
}

/// Build the manifest key of a peer record
pub fn peer_key(writer_key: &str) -> String {
	format!("{}{}", PEER_PREFIX, writer_key)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classify_file_keys() {
		assert_eq!(classify("/a.txt").unwrap(), KeyKind::File);
		assert_eq!(classify("/dir/sub/a.txt").unwrap(), KeyKind::File);
	}

	#[test]
	fn test_classify_system_keys() {
		assert_eq!(classify("__config").unwrap(), KeyKind::Config);
		assert_eq!(classify("__peer:abc123").unwrap(), KeyKind::Peer("abc123"));
	}

	#[test]
	fn test_classify_rejects_unknown_reserved() {
		assert!(classify("__peers").is_err());
		assert!(classify("__foo").is_err());
		assert!(classify("__peer:").is_err());
		assert!(classify("__peer:not-hex!").is_err());
	}

	#[test]
	fn test_classify_rejects_non_canonical() {
		assert!(classify("a.txt").is_err());
		assert!(classify("/a//b").is_err());
		assert!(classify("/a/../b").is_err());
		assert!(classify("/a/./b").is_err());
		assert!(classify("/").is_err());
		assert!(classify("").is_err());
	}

	#[test]
	fn test_canonicalize_simple() {
		assert_eq!(canonicalize(Path::new("a.txt")).unwrap(), "/a.txt");
		assert_eq!(canonicalize(Path::new("dir/sub/a.txt")).unwrap(), "/dir/sub/a.txt");
		assert_eq!(canonicalize(Path::new("./dir/a.txt")).unwrap(), "/dir/a.txt");
	}

	#[test]
	fn test_canonicalize_rejects_escapes() {
		assert!(canonicalize(Path::new("../a.txt")).is_err());
		assert!(canonicalize(Path::new("dir/../../a.txt")).is_err());
		assert!(canonicalize(Path::new("/abs/a.txt")).is_err());
		assert!(canonicalize(Path::new("")).is_err());
	}

	#[test]
	fn test_is_internal() {
		assert!(is_internal("/.pearsync"));
		assert!(is_internal("/.pearsync/state.json"));
		assert!(!is_internal("/.pearsync-old/state.json"));
		assert!(!is_internal("/docs/a.txt"));
	}

	#[test]
	fn test_fs_path_round_trip() {
		let root = Path::new("/sync/root");
		assert_eq!(fs_path(root, "/dir/a.txt"), root.join("dir").join("a.txt"));
	}
}

// vim: ts=4
