//! Engine event contract
//!
//! Consumers subscribe to the engine and receive a tagged event stream; the
//! returned [`Subscription`] is the unsubscribe handle (dropping it detaches
//! the consumer).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::manifest::StartupPolicy;

/// Direction of a completed sync step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
	LocalToRemote,
	RemoteToLocal,
}

impl fmt::Display for SyncDirection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncDirection::LocalToRemote => f.write_str("local-to-remote"),
			SyncDirection::RemoteToLocal => f.write_str("remote-to-local"),
		}
	}
}

/// What a sync step did to the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
	Update,
	Delete,
	Conflict,
}

impl fmt::Display for SyncKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncKind::Update => f.write_str("update"),
			SyncKind::Delete => f.write_str("delete"),
			SyncKind::Conflict => f.write_str("conflict"),
		}
	}
}

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
	/// A sync step completed for a path
	Sync {
		direction: SyncDirection,
		kind: SyncKind,
		path: String,
		conflict_path: Option<String>,
	},

	/// The startup conflict policy was applied to these paths
	Audit { policy: StartupPolicy, affected_paths: Vec<String> },

	/// A worker step failed; the queue continues with the next item
	Error { message: String },
}

struct BusInner {
	next_id: u64,
	subscribers: BTreeMap<u64, mpsc::UnboundedSender<EngineEvent>>,
}

/// Fan-out event bus owned by the engine
#[derive(Clone)]
pub struct EventBus {
	inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
	pub fn new() -> Self {
		EventBus { inner: Arc::new(Mutex::new(BusInner { next_id: 0, subscribers: BTreeMap::new() })) }
	}

	/// Attach a consumer. The returned handle receives every subsequent
	/// event until it is dropped or `unsubscribe` is called.
	pub fn subscribe(&self) -> Subscription {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		let id = inner.next_id;
		inner.next_id += 1;
		inner.subscribers.insert(id, tx);
		Subscription { id, rx, bus: Arc::downgrade(&self.inner) }
	}

	pub fn emit(&self, event: EngineEvent) {
		let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		inner.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

/// Unsubscribe handle returned by [`EventBus::subscribe`]
pub struct Subscription {
	id: u64,
	rx: mpsc::UnboundedReceiver<EngineEvent>,
	bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
	/// Receive the next event; `None` once detached and drained
	pub async fn recv(&mut self) -> Option<EngineEvent> {
		self.rx.recv().await
	}

	/// Non-blocking receive for callers polling between other work
	pub fn try_recv(&mut self) -> Option<EngineEvent> {
		self.rx.try_recv().ok()
	}

	/// Detach from the bus explicitly (dropping the handle does the same)
	pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(inner) = self.bus.upgrade() {
			let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			inner.subscribers.remove(&self.id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_subscribe_receives_events() {
		let bus = EventBus::new();
		let mut sub = bus.subscribe();

		bus.emit(EngineEvent::Error { message: "boom".to_string() });
		match sub.recv().await {
			Some(EngineEvent::Error { message }) => assert_eq!(message, "boom"),
			other => panic!("unexpected event: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_unsubscribe_detaches() {
		let bus = EventBus::new();
		let sub = bus.subscribe();
		sub.unsubscribe();

		// Emit after detach must not block or fail
		bus.emit(EngineEvent::Error { message: "late".to_string() });

		let mut sub2 = bus.subscribe();
		bus.emit(EngineEvent::Error { message: "seen".to_string() });
		assert!(matches!(sub2.recv().await, Some(EngineEvent::Error { .. })));
	}

	#[tokio::test]
	async fn test_multiple_subscribers_fan_out() {
		let bus = EventBus::new();
		let mut a = bus.subscribe();
		let mut b = bus.subscribe();

		bus.emit(EngineEvent::Sync {
			direction: SyncDirection::LocalToRemote,
			kind: SyncKind::Update,
			path: "/a.txt".to_string(),
			conflict_path: None,
		});

		assert!(matches!(a.recv().await, Some(EngineEvent::Sync { .. })));
		assert!(matches!(b.recv().await, Some(EngineEvent::Sync { .. })));
	}

	#[test]
	fn test_display_formats() {
		assert_eq!(SyncDirection::LocalToRemote.to_string(), "local-to-remote");
		assert_eq!(SyncDirection::RemoteToLocal.to_string(), "remote-to-local");
		assert_eq!(SyncKind::Conflict.to_string(), "conflict");
	}
}

// vim: ts=4
