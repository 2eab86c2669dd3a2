//! External log contracts consumed by the engine
//!
//! The replicated multi-writer manifest and the per-peer append-only block
//! logs are external collaborators; the engine only depends on the two traits
//! here. The `memory` submodule provides a complete in-process group used by
//! tests and join previews.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::manifest::BlockRange;

/// Replicated multi-writer key/value log holding manifest entries.
///
/// Values are opaque strings; the engine serializes canonical JSON and the
/// schema validator enforces shape on both sides. Any write by any
/// participant produces an update notification.
#[async_trait]
pub trait ManifestLog: Send + Sync {
	async fn put(&self, key: &str, value: &str) -> Result<(), SyncError>;

	async fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

	async fn list(&self) -> Result<Vec<(String, String)>, SyncError>;

	async fn remove(&self, key: &str) -> Result<(), SyncError>;

	/// Subscribe to update notifications. Receivers may observe lag under
	/// bursts; a lagged receiver should simply reconcile once.
	fn updates(&self) -> broadcast::Receiver<()>;

	/// Mint an invite code another participant can pair with
	async fn create_invite(&self) -> Result<String, SyncError>;
}

/// Append-only log of fixed 64 KiB blocks keyed by writer identity.
///
/// Bytes written by peer X are readable by peer Y via
/// `read_blocks(writer_key_of_x, ..)`. A missing block is a hard error.
#[async_trait]
pub trait BlockStore: Send + Sync {
	/// The identity of this store's own log
	fn writer_key(&self) -> String;

	/// Append blocks to the own log, returning their contiguous range
	async fn append(&self, blocks: Vec<Vec<u8>>) -> Result<BlockRange, SyncError>;

	/// Random-access read of `count` blocks at `offset` from any writer's log
	async fn read_blocks(
		&self,
		writer_key: &str,
		offset: u64,
		count: u64,
	) -> Result<Vec<Vec<u8>>, SyncError>;
}

pub mod memory {
	//! In-process sync group: one shared manifest plus per-writer block logs.

	use std::collections::{BTreeMap, BTreeSet};
	use std::sync::{Arc, Mutex, MutexGuard};

	use async_trait::async_trait;
	use tokio::sync::broadcast;
	use uuid::Uuid;

	use super::{BlockStore, ManifestLog};
	use crate::error::SyncError;
	use crate::manifest::BlockRange;

	const UPDATE_CHANNEL_CAPACITY: usize = 256;

	struct GroupInner {
		entries: Mutex<BTreeMap<String, String>>,
		logs: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
		invites: Mutex<BTreeSet<String>>,
		updates: broadcast::Sender<()>,
	}

	fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
		mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// An in-process sync group. Cloning yields another handle onto the same
	/// shared state, which is how a second "peer" attaches in tests.
	#[derive(Clone)]
	pub struct MemoryGroup {
		inner: Arc<GroupInner>,
	}

	impl MemoryGroup {
		pub fn new() -> Self {
			let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
			MemoryGroup {
				inner: Arc::new(GroupInner {
					entries: Mutex::new(BTreeMap::new()),
					logs: Mutex::new(BTreeMap::new()),
					invites: Mutex::new(BTreeSet::new()),
					updates,
				}),
			}
		}

		/// A manifest handle onto the shared group log
		pub fn manifest(&self) -> Arc<MemoryManifestLog> {
			Arc::new(MemoryManifestLog { inner: self.inner.clone() })
		}

		/// A block store with a freshly minted writer identity
		pub fn block_store(&self) -> Arc<MemoryBlockStore> {
			MemoryBlockStore::with_writer_key(self, Uuid::new_v4().simple().to_string())
		}

		/// Attach to the group with an invite previously minted by
		/// `create_invite`. The returned handle shares all group state.
		pub fn pair(&self, invite: &str) -> Result<MemoryGroup, SyncError> {
			if locked(&self.inner.invites).remove(invite) {
				Ok(self.clone())
			} else {
				Err(SyncError::Log { message: format!("unknown invite code: {}", invite) })
			}
		}
	}

	impl Default for MemoryGroup {
		fn default() -> Self {
			Self::new()
		}
	}

	/// Manifest view of a [`MemoryGroup`]
	pub struct MemoryManifestLog {
		inner: Arc<GroupInner>,
	}

	#[async_trait]
	impl ManifestLog for MemoryManifestLog {
		async fn put(&self, key: &str, value: &str) -> Result<(), SyncError> {
			locked(&self.inner.entries).insert(key.to_string(), value.to_string());
			let _ = self.inner.updates.send(());
			Ok(())
		}

		async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
			Ok(locked(&self.inner.entries).get(key).cloned())
		}

		async fn list(&self) -> Result<Vec<(String, String)>, SyncError> {
			Ok(locked(&self.inner.entries)
				.iter()
				.map(|(key, value)| (key.clone(), value.clone()))
				.collect())
		}

		async fn remove(&self, key: &str) -> Result<(), SyncError> {
			locked(&self.inner.entries).remove(key);
			let _ = self.inner.updates.send(());
			Ok(())
		}

		fn updates(&self) -> broadcast::Receiver<()> {
			self.inner.updates.subscribe()
		}

		async fn create_invite(&self) -> Result<String, SyncError> {
			let code = Uuid::new_v4().simple().to_string();
			locked(&self.inner.invites).insert(code.clone());
			Ok(code)
		}
	}

	/// One writer's block log inside a [`MemoryGroup`]
	pub struct MemoryBlockStore {
		inner: Arc<GroupInner>,
		writer_key: String,
	}

	impl MemoryBlockStore {
		/// Open a store under a caller-chosen writer key (tests use fixed
		/// keys for readable assertions)
		pub fn with_writer_key(group: &MemoryGroup, writer_key: String) -> Arc<Self> {
			locked(&group.inner.logs).entry(writer_key.clone()).or_default();
			Arc::new(MemoryBlockStore { inner: group.inner.clone(), writer_key })
		}
	}

	#[async_trait]
	impl BlockStore for MemoryBlockStore {
		fn writer_key(&self) -> String {
			self.writer_key.clone()
		}

		async fn append(&self, blocks: Vec<Vec<u8>>) -> Result<BlockRange, SyncError> {
			let mut logs = locked(&self.inner.logs);
			let log = logs.entry(self.writer_key.clone()).or_default();
			let range = BlockRange { offset: log.len() as u64, length: blocks.len() as u64 };
			log.extend(blocks);
			Ok(range)
		}

		async fn read_blocks(
			&self,
			writer_key: &str,
			offset: u64,
			count: u64,
		) -> Result<Vec<Vec<u8>>, SyncError> {
			let logs = locked(&self.inner.logs);
			let log = logs.get(writer_key).ok_or_else(|| SyncError::MissingBlock {
				writer_key: writer_key.to_string(),
				index: offset,
			})?;
			let mut out = Vec::with_capacity(count as usize);
			for index in offset..offset + count {
				match log.get(index as usize) {
					Some(block) => out.push(block.clone()),
					None => {
						return Err(SyncError::MissingBlock {
							writer_key: writer_key.to_string(),
							index,
						})
					}
				}
			}
			Ok(out)
		}
	}
}


// vim: ts=4
