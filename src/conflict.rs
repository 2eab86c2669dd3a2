//! Conflict-copy naming
//!
//! When a remote version wins a divergence, the losing local bytes are kept
//! under a renamed sibling that encodes the losing peer's short name and the
//! UTC date: `/dir/name.conflict-2026-08-01-pqrstuvw.ext`. There is no
//! collision-avoidance suffix; a second conflict on the same day for the same
//! peer overwrites the prior copy.

use chrono::NaiveDate;

/// Length of the short peer name derived from a writer key
pub const SHORT_PEER_LEN: usize = 8;

/// Short peer name: the first eight characters of the writer key
pub fn short_peer(writer_key: &str) -> &str {
	&writer_key[..writer_key.len().min(SHORT_PEER_LEN)]
}

/// Build the conflict-copy key for a canonical user-file key.
///
/// If the final path segment has an extension, the marker is spliced before
/// it; otherwise the marker is appended to the whole key.
pub fn conflict_path(key: &str, peer: &str, date: NaiveDate) -> String {
	let marker = format!("conflict-{}-{}", date.format("%Y-%m-%d"), peer);
	let last_slash = key.rfind('/');
	match key.rfind('.') {
		Some(dot) if last_slash.map_or(true, |slash| dot > slash) => {
			format!("{}.{}{}", &key[..dot], marker, &key[dot..])
		}
		_ => format!("{}.{}", key, marker),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn date() -> NaiveDate {
		NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
	}

	#[test]
	fn test_conflict_path_with_extension() {
		assert_eq!(
			conflict_path("/dir/name.ext", "pqrstuvw", date()),
			"/dir/name.conflict-2026-08-01-pqrstuvw.ext"
		);
	}

	#[test]
	fn test_conflict_path_without_extension() {
		assert_eq!(
			conflict_path("/dir/name", "pqrstuvw", date()),
			"/dir/name.conflict-2026-08-01-pqrstuvw"
		);
	}

	#[test]
	fn test_conflict_path_dot_in_directory_only() {
		// The dot belongs to a directory segment, not the file name
		assert_eq!(
			conflict_path("/dir.d/name", "pqrstuvw", date()),
			"/dir.d/name.conflict-2026-08-01-pqrstuvw"
		);
	}

	#[test]
	fn test_conflict_path_multiple_dots() {
		assert_eq!(
			conflict_path("/a/b.tar.gz", "deadbeef", date()),
			"/a/b.tar.conflict-2026-08-01-deadbeef.gz"
		);
	}

	#[test]
	fn test_conflict_path_single_day_overwrites() {
		// Same path, peer and date always produce the same copy name
		let a = conflict_path("/x.txt", "peer0001", date());
		let b = conflict_path("/x.txt", "peer0001", date());
		assert_eq!(a, b);
	}

	#[test]
	fn test_conflict_path_distinct_inputs_distinct_names() {
		let base = conflict_path("/x.txt", "peer0001", date());
		assert_ne!(conflict_path("/y.txt", "peer0001", date()), base);
		assert_ne!(conflict_path("/x.txt", "peer0002", date()), base);
		let other_day = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
		assert_ne!(conflict_path("/x.txt", "peer0001", other_day), base);
	}

	#[test]
	fn test_short_peer() {
		assert_eq!(short_peer("0123456789abcdef"), "01234567");
		assert_eq!(short_peer("abc"), "abc");
	}
}

// vim: ts=4
