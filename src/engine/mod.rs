//! The reconciler
//!
//! `SyncEngine` ties everything together: it observes filesystem changes,
//! consults the replicated manifest, fetches remote content blocks,
//! materializes files, resolves conflicts, applies tombstones and keeps the
//! local tracking state current.
//!
//! Scheduling is two serial queues. The local queue processes watcher events
//! in arrival order; the remote queue runs one full reconcile per burst of
//! manifest update notifications (notifications arriving mid-pass coalesce
//! into a single trailing pass).

mod local;
mod remote;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::HashCache;
use crate::config::EngineConfig;
use crate::conflict;
use crate::error::SyncError;
use crate::events::{EngineEvent, EventBus, Subscription};
use crate::exclusion::ExclusionRules;
use crate::log::{BlockStore, ManifestLog};
use crate::logging::*;
use crate::manifest::{self, ManifestValue, PeerRecord, StartupPolicy};
use crate::paths;
use crate::preview::PreparedSession;
use crate::store::LocalStateStore;
use crate::watcher::{FolderWatcher, LocalChange};

/// File name of the hash cache inside `/.pearsync/`
const HASH_CACHE_FILE: &str = "hashcache.redb";

/// Options for constructing an engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
	/// Directory to keep in sync
	pub sync_root: PathBuf,

	/// Human-readable peer name; defaults to the short writer key
	pub peer_name: Option<String>,

	/// Conflict policy override for the first reconcile pass
	pub startup_policy: Option<StartupPolicy>,

	/// User glob excludes on top of the always-ignored `/.pearsync/**`
	pub exclude_patterns: Vec<String>,
}

impl EngineOptions {
	pub fn new(sync_root: impl Into<PathBuf>) -> Self {
		EngineOptions {
			sync_root: sync_root.into(),
			peer_name: None,
			startup_policy: None,
			exclude_patterns: Vec::new(),
		}
	}

	pub fn from_config(config: &EngineConfig) -> Self {
		EngineOptions {
			sync_root: config.sync_folder.clone(),
			peer_name: config.peer_name.clone(),
			startup_policy: config.startup_conflict_policy,
			exclude_patterns: config.exclude_patterns.clone(),
		}
	}
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the engine handle and its queue workers
struct EngineShared {
	root: PathBuf,
	manifest: Arc<dyn ManifestLog>,
	blocks: Arc<dyn BlockStore>,
	writer_key: String,
	peer_name: String,
	store: LocalStateStore,
	cache: Option<HashCache>,
	rules: Arc<ExclusionRules>,
	/// Credits for paths the engine itself is about to write; the watcher
	/// handler drains one credit per matching event
	suppressed: Mutex<HashMap<String, u32>>,
	events: EventBus,
	/// Consumed by the first remote reconcile pass
	startup_policy: Mutex<Option<StartupPolicy>>,
}

impl EngineShared {
	fn suppress(&self, key: &str) {
		*locked(&self.suppressed).entry(key.to_string()).or_insert(0) += 1;
	}

	fn unsuppress(&self, key: &str) {
		let _ = self.take_suppression(key);
	}

	fn take_suppression(&self, key: &str) -> bool {
		let mut map = locked(&self.suppressed);
		match map.get_mut(key) {
			Some(credits) => {
				*credits -= 1;
				if *credits == 0 {
					map.remove(key);
				}
				true
			}
			None => false,
		}
	}

	fn report_error(&self, context: &str, e: &SyncError) {
		error!("{}: {}", context, e);
		self.events.emit(EngineEvent::Error { message: format!("{}: {}", context, e) });
	}

	fn report_state_error(&self, context: &str, e: crate::error::StateError) {
		self.report_error(context, &SyncError::State(e));
	}
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

fn local_mtime_ms(meta: &std::fs::Metadata) -> i64 {
	meta.modified()
		.ok()
		.and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
		.map(|duration| duration.as_millis() as i64)
		.unwrap_or(0)
}

/// The local reconciler for one sync root
pub struct SyncEngine {
	shared: Arc<EngineShared>,
	local_tx: Option<mpsc::UnboundedSender<LocalChange>>,
	watcher: Option<FolderWatcher>,
	workers: Vec<JoinHandle<()>>,
	shutdown_tx: Option<watch::Sender<bool>>,
	started: bool,
}

impl SyncEngine {
	/// Open all engine-owned resources: load the tracking store, open the
	/// hash cache, and register this peer's record in the manifest.
	pub async fn ready(
		options: EngineOptions,
		manifest: Arc<dyn ManifestLog>,
		blocks: Arc<dyn BlockStore>,
	) -> Result<SyncEngine, SyncError> {
		let rules = Arc::new(ExclusionRules::new(&options.exclude_patterns)?);
		let internal_dir = options.sync_root.join(paths::INTERNAL_DIR);
		let store = LocalStateStore::load(&internal_dir).await?;
		let cache = match HashCache::open(&internal_dir.join(HASH_CACHE_FILE)) {
			Ok(cache) => Some(cache),
			Err(e) => {
				warn!("hash cache unavailable: {}", e);
				None
			}
		};

		let writer_key = blocks.writer_key();
		let peer_name = options
			.peer_name
			.unwrap_or_else(|| conflict::short_peer(&writer_key).to_string());

		let shared = Arc::new(EngineShared {
			root: options.sync_root,
			manifest,
			blocks,
			writer_key: writer_key.clone(),
			peer_name: peer_name.clone(),
			store,
			cache,
			rules,
			suppressed: Mutex::new(HashMap::new()),
			events: EventBus::new(),
			startup_policy: Mutex::new(options.startup_policy),
		});

		let record = PeerRecord { writer_key: writer_key.clone(), name: peer_name, updated_at: now_ms() };
		manifest::put_value(
			shared.manifest.as_ref(),
			&paths::peer_key(&writer_key),
			&ManifestValue::Peer(record),
		)
		.await?;

		info!("engine ready at {} as {}", shared.root.display(), shared.writer_key);
		Ok(SyncEngine {
			shared,
			local_tx: None,
			watcher: None,
			workers: Vec::new(),
			shutdown_tx: None,
			started: false,
		})
	}

	/// Like [`SyncEngine::ready`], attaching through a prepared join-preview
	/// session instead of redoing the pairing handshake.
	pub async fn with_session(
		options: EngineOptions,
		session: PreparedSession,
		blocks: Arc<dyn BlockStore>,
	) -> Result<SyncEngine, SyncError> {
		Self::ready(options, session.manifest, blocks).await
	}

	/// Perform initial reconciliation, then subscribe to filesystem events
	/// and manifest updates.
	pub async fn start(&mut self) -> Result<(), SyncError> {
		if self.started {
			return Ok(());
		}
		let shared = self.shared.clone();

		// Subscribe before the initial pass so updates arriving during it
		// are not lost.
		let updates = shared.manifest.updates();

		self.publish_group_config().await;

		// Remote first: a returning peer must not re-publish stale local
		// bytes over a newer remote version.
		if let Err(e) = remote::reconcile_all_remotes(&shared).await {
			shared.report_error("initial remote reconcile", &e);
		}
		if let Err(e) = local::initial_scan(&shared).await {
			shared.report_error("initial local scan", &e);
		}

		// Writes made before the watcher attaches produce no events; their
		// credits must not linger and swallow a later user edit.
		locked(&shared.suppressed).clear();

		let (local_tx, local_rx) = mpsc::unbounded_channel();
		let watcher = FolderWatcher::start(&shared.root, shared.rules.clone(), local_tx.clone())?;
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		self.workers.push(tokio::spawn(local_worker(
			shared.clone(),
			local_rx,
			shutdown_rx.clone(),
		)));
		self.workers.push(tokio::spawn(remote_worker(shared, updates, shutdown_rx)));
		self.local_tx = Some(local_tx);
		self.watcher = Some(watcher);
		self.shutdown_tx = Some(shutdown_tx);
		self.started = true;
		Ok(())
	}

	/// Resolve the effective startup policy (options override the group
	/// config) and publish the group-visible config record.
	async fn publish_group_config(&self) {
		let shared = &self.shared;
		let existing = match manifest::get_value(shared.manifest.as_ref(), paths::CONFIG_KEY).await
		{
			Ok(Some(ManifestValue::Config(config))) => Some(config),
			Ok(_) => None,
			Err(e) => {
				shared.report_error("read group config", &e);
				None
			}
		};

		let effective = {
			let mut slot = locked(&shared.startup_policy);
			if slot.is_none() {
				*slot = existing.as_ref().and_then(|config| config.startup_conflict_policy());
			}
			*slot
		};

		let mut config = existing.unwrap_or_default();
		config.peer_name = Some(shared.peer_name.clone());
		if let Some(policy) = effective {
			config.set_startup_conflict_policy(policy);
		}
		if let Err(e) = manifest::put_value(
			shared.manifest.as_ref(),
			paths::CONFIG_KEY,
			&ManifestValue::Config(config),
		)
		.await
		{
			shared.report_error("publish group config", &e);
		}
	}

	/// Tear down subscriptions and drain both queues to completion
	pub async fn stop(&mut self) {
		if !self.started {
			return;
		}
		drop(self.watcher.take());
		if let Some(tx) = self.shutdown_tx.take() {
			let _ = tx.send(true);
		}
		drop(self.local_tx.take());
		for handle in self.workers.drain(..) {
			let _ = handle.await;
		}
		self.started = false;
		info!("engine stopped");
	}

	/// `stop` plus release of engine-owned resources
	pub async fn close(&mut self) {
		self.stop().await;
		if let Err(e) = self.shared.store.flush().await {
			warn!("final state flush failed: {}", e);
		}
	}

	/// Attach an event consumer
	pub fn subscribe(&self) -> Subscription {
		self.shared.events.subscribe()
	}

	/// Look up a peer's registered name, falling back to the short key
	pub async fn get_peer_name(&self, writer_key: &str) -> String {
		match manifest::get_value(self.shared.manifest.as_ref(), &paths::peer_key(writer_key))
			.await
		{
			Ok(Some(ManifestValue::Peer(peer))) => peer.name,
			_ => conflict::short_peer(writer_key).to_string(),
		}
	}

	pub fn writer_key(&self) -> &str {
		&self.shared.writer_key
	}

	pub fn sync_root(&self) -> &Path {
		&self.shared.root
	}
}

async fn local_worker(
	shared: Arc<EngineShared>,
	mut rx: mpsc::UnboundedReceiver<LocalChange>,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => {
				// Drain whatever is already queued, then exit
				while let Ok(change) = rx.try_recv() {
					process_local(&shared, change).await;
				}
				break;
			}
			change = rx.recv() => match change {
				Some(change) => process_local(&shared, change).await,
				None => break,
			}
		}
	}
}

async fn process_local(shared: &EngineShared, change: LocalChange) {
	debug!("local change {:?} {}", change.kind, change.path);
	if let Err(e) = local::handle_local_change(shared, &change).await {
		shared.report_error(&format!("local change {}", change.path), &e);
	}
}

async fn remote_worker(
	shared: Arc<EngineShared>,
	mut updates: broadcast::Receiver<()>,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			result = updates.recv() => {
				match result {
					Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
						// Coalesce: one pass covers every notification
						// queued so far
						loop {
							match updates.try_recv() {
								Ok(()) => continue,
								Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
								Err(_) => break,
							}
						}
						if let Err(e) = remote::reconcile_all_remotes(&shared).await {
							shared.report_error("remote reconcile", &e);
						}
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		}
	}
}

// vim: ts=4
