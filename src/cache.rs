//! Content-hash cache for incremental scanning
//!
//! Stores the last known `(size, mtime, hash)` per path so startup walks and
//! repeated watcher events skip re-hashing unchanged files. Purely an
//! optimization: a miss or a stale entry just falls back to hashing.

use std::path::Path;

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Cache entry for a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
	size: u64,
	mtime: i64,
	hash: String,
}

/// Key: canonical file key (String); value: serialized CacheEntry (bytes)
const HASHES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hashes");

/// Hash memo backed by a redb database
pub struct HashCache {
	db: redb::Database,
}

fn cache_err<E: std::fmt::Display>(e: E) -> SyncError {
	SyncError::Other { message: format!("hash cache: {}", e) }
}

impl HashCache {
	/// Open or create a cache database
	pub fn open(db_path: &Path) -> Result<Self, SyncError> {
		let db = redb::Database::create(db_path).map_err(cache_err)?;
		// Ensure the table exists
		{
			let write_txn = db.begin_write().map_err(cache_err)?;
			let _ = write_txn.open_table(HASHES_TABLE).map_err(cache_err)?;
			write_txn.commit().map_err(cache_err)?;
		}
		Ok(HashCache { db })
	}

	/// Return the cached hash if size and mtime still match
	pub fn lookup(&self, key: &str, size: u64, mtime: i64) -> Result<Option<String>, SyncError> {
		let read_txn = self.db.begin_read().map_err(cache_err)?;
		let table = read_txn.open_table(HASHES_TABLE).map_err(cache_err)?;

		match table.get(key).map_err(cache_err)? {
			Some(guard) => {
				let bytes = guard.value().to_vec();
				let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(cache_err)?;
				if entry.size == size && entry.mtime == mtime {
					Ok(Some(entry.hash))
				} else {
					Ok(None)
				}
			}
			None => Ok(None),
		}
	}

	/// Store or update the entry for a file
	pub fn record(&self, key: &str, size: u64, mtime: i64, hash: &str) -> Result<(), SyncError> {
		let entry = CacheEntry { size, mtime, hash: hash.to_string() };
		let bytes = serde_json::to_vec(&entry).map_err(cache_err)?;

		let write_txn = self.db.begin_write().map_err(cache_err)?;
		{
			let mut table = write_txn.open_table(HASHES_TABLE).map_err(cache_err)?;
			table.insert(key, bytes.as_slice()).map_err(cache_err)?;
		}
		write_txn.commit().map_err(cache_err)?;

		Ok(())
	}

	/// Drop the entry for a deleted file
	pub fn forget(&self, key: &str) -> Result<(), SyncError> {
		let write_txn = self.db.begin_write().map_err(cache_err)?;
		{
			let mut table = write_txn.open_table(HASHES_TABLE).map_err(cache_err)?;
			table.remove(key).map_err(cache_err)?;
		}
		write_txn.commit().map_err(cache_err)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_hit_and_stale() {
		let dir = tempfile::tempdir().unwrap();
		let cache = HashCache::open(&dir.path().join("hashcache.redb")).unwrap();

		cache.record("/a.txt", 10, 1000, "deadbeef").unwrap();
		assert_eq!(cache.lookup("/a.txt", 10, 1000).unwrap().as_deref(), Some("deadbeef"));

		// Changed size or mtime invalidates
		assert_eq!(cache.lookup("/a.txt", 11, 1000).unwrap(), None);
		assert_eq!(cache.lookup("/a.txt", 10, 2000).unwrap(), None);
	}

	#[test]
	fn test_miss_and_forget() {
		let dir = tempfile::tempdir().unwrap();
		let cache = HashCache::open(&dir.path().join("hashcache.redb")).unwrap();

		assert_eq!(cache.lookup("/missing", 1, 1).unwrap(), None);

		cache.record("/a.txt", 10, 1000, "deadbeef").unwrap();
		cache.forget("/a.txt").unwrap();
		assert_eq!(cache.lookup("/a.txt", 10, 1000).unwrap(), None);
	}

	#[test]
	fn test_record_overwrites() {
		let dir = tempfile::tempdir().unwrap();
		let cache = HashCache::open(&dir.path().join("hashcache.redb")).unwrap();

		cache.record("/a.txt", 10, 1000, "old").unwrap();
		cache.record("/a.txt", 12, 1001, "new").unwrap();
		assert_eq!(cache.lookup("/a.txt", 12, 1001).unwrap().as_deref(), Some("new"));
	}
}

// vim: ts=4
