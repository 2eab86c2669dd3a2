//! # PearSync - Peer-to-Peer Folder Synchronizer Core
//!
//! Each participant watches a local directory and keeps it byte-identical
//! with every other participant in the same sync group, with no central
//! server, through a shared multi-writer manifest log plus per-peer
//! append-only content logs.
//!
//! The heart of the crate is [`engine::SyncEngine`], the local reconciler:
//! it observes filesystem changes, consults the replicated manifest, fetches
//! remote content blocks, materializes files, resolves conflicts with
//! conflict copies, applies deletion tombstones and persists local tracking
//! state so restarts do not regress.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pearsync::engine::{EngineOptions, SyncEngine};
//! use pearsync::log::memory::MemoryGroup;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pearsync::SyncError> {
//!     let group = MemoryGroup::new();
//!     let mut engine = SyncEngine::ready(
//!         EngineOptions::new("./shared"),
//!         group.manifest(),
//!         group.block_store(),
//!     )
//!     .await?;
//!     engine.start().await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod exclusion;
pub mod hashing;
pub mod log;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod preview;
pub mod store;
pub mod watcher;

// Re-export commonly used types and functions
pub use config::EngineConfig;
pub use engine::{EngineOptions, SyncEngine};
pub use error::{SchemaError, StateError, SyncError};
pub use events::{EngineEvent, Subscription, SyncDirection, SyncKind};
pub use log::{BlockStore, ManifestLog};
pub use manifest::{
	BlockRange, ConfigRecord, FileRecord, ManifestValue, PeerRecord, StartupPolicy,
	TombstoneRecord,
};
pub use preview::{preview_join, JoinAnalysis, PreparedSession};
pub use store::{LocalStateStore, TrackedEntry};

// vim: ts=4
