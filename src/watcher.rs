//! Filesystem watcher feeding the engine's local queue
//!
//! Raw notify events are mapped to canonical `(ChangeKind, key)` pairs.
//! Excluded paths never reach the queue; directory events are dropped
//! (directories are tracked implicitly through the files they contain).

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::exclusion::ExclusionRules;
use crate::logging::*;
use crate::paths;

/// What happened to a path on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	Update,
	Delete,
}

/// A single watcher observation, already canonicalized
#[derive(Debug, Clone)]
pub struct LocalChange {
	pub kind: ChangeKind,
	pub path: String,
}

/// Recursive watcher over the sync root. Watching stops when the value is
/// dropped.
pub struct FolderWatcher {
	_watcher: RecommendedWatcher,
}

impl FolderWatcher {
	pub fn start(
		root: &Path,
		rules: Arc<ExclusionRules>,
		tx: mpsc::UnboundedSender<LocalChange>,
	) -> Result<Self, SyncError> {
		let root_buf = root.to_path_buf();
		let mut watcher =
			notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
				let event = match result {
					Ok(event) => event,
					Err(e) => {
						warn!("watch error: {}", e);
						return;
					}
				};
				if !matches!(
					event.kind,
					EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
				) {
					return;
				}
				for path in &event.paths {
					if let Some(change) = classify_event(&root_buf, &event.kind, path, &rules) {
						let _ = tx.send(change);
					}
				}
			})
			.map_err(watch_err)?;
		watcher.watch(root, RecursiveMode::Recursive).map_err(watch_err)?;
		Ok(FolderWatcher { _watcher: watcher })
	}
}

fn watch_err(e: notify::Error) -> SyncError {
	SyncError::Other { message: format!("watcher: {}", e) }
}

fn classify_event(
	root: &Path,
	kind: &EventKind,
	path: &Path,
	rules: &ExclusionRules,
) -> Option<LocalChange> {
	let rel = path.strip_prefix(root).ok()?;
	let key = paths::canonicalize(rel).ok()?;
	if rules.is_excluded(&key) {
		return None;
	}
	let meta = std::fs::metadata(path).ok();
	if meta.as_ref().is_some_and(|meta| meta.is_dir()) {
		return None;
	}
	// Rename-away arrives as a Modify whose path no longer exists
	let kind = match kind {
		EventKind::Remove(_) => ChangeKind::Delete,
		_ if meta.is_some() => ChangeKind::Update,
		_ => ChangeKind::Delete,
	};
	Some(LocalChange { kind, path: key })
}

#[cfg(test)]
mod tests {
	use super::*;
	use notify::event::{CreateKind, ModifyKind, RemoveKind};

	#[test]
	fn test_classify_update_and_delete() {
		let dir = tempfile::tempdir().unwrap();
		let rules = ExclusionRules::none();

		let file = dir.path().join("a.txt");
		std::fs::write(&file, b"x").unwrap();

		let change =
			classify_event(dir.path(), &EventKind::Create(CreateKind::File), &file, &rules)
				.unwrap();
		assert_eq!(change.kind, ChangeKind::Update);
		assert_eq!(change.path, "/a.txt");

		std::fs::remove_file(&file).unwrap();
		let change =
			classify_event(dir.path(), &EventKind::Remove(RemoveKind::File), &file, &rules)
				.unwrap();
		assert_eq!(change.kind, ChangeKind::Delete);
	}

	#[test]
	fn test_classify_missing_modify_is_delete() {
		let dir = tempfile::tempdir().unwrap();
		let rules = ExclusionRules::none();
		let gone = dir.path().join("renamed-away.txt");

		let change = classify_event(
			dir.path(),
			&EventKind::Modify(ModifyKind::Any),
			&gone,
			&rules,
		)
		.unwrap();
		assert_eq!(change.kind, ChangeKind::Delete);
	}

	#[test]
	fn test_classify_skips_internal_and_dirs() {
		let dir = tempfile::tempdir().unwrap();
		let rules = ExclusionRules::none();

		let internal = dir.path().join(".pearsync").join("state.json");
		std::fs::create_dir_all(internal.parent().unwrap()).unwrap();
		std::fs::write(&internal, b"{}").unwrap();
		assert!(classify_event(
			dir.path(),
			&EventKind::Modify(ModifyKind::Any),
			&internal,
			&rules
		)
		.is_none());

		let sub = dir.path().join("sub");
		std::fs::create_dir_all(&sub).unwrap();
		assert!(classify_event(dir.path(), &EventKind::Create(CreateKind::Folder), &sub, &rules)
			.is_none());
	}

	#[test]
	fn test_classify_foreign_path_ignored() {
		let dir = tempfile::tempdir().unwrap();
		let rules = ExclusionRules::none();
		assert!(classify_event(
			dir.path(),
			&EventKind::Modify(ModifyKind::Any),
			Path::new("/elsewhere/x"),
			&rules
		)
		.is_none());
	}
}

// vim: ts=4
