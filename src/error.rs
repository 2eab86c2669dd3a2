//! Error types for PearSync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for engine operations
///
/// This is the unified error type that encompasses all sync-related errors.
/// It contains both direct variants for common failures and nested variants
/// for domain-specific errors.
#[derive(Debug)]
pub enum SyncError {
	/// I/O error
	Io(io::Error),

	/// Manifest value cannot be parsed or its path/type pairing disagrees
	Schema(SchemaError),

	/// Local tracking state could not be loaded or persisted
	State(StateError),

	/// A remote block log reported a missing block
	MissingBlock { writer_key: String, index: u64 },

	/// Attempted write with a reserved key outside the known system keys
	PolicyViolation { message: String },

	/// Downloaded content does not hash to the manifest value
	HashMismatch { expected: String, actual: String },

	/// The underlying replicated log failed
	Log { message: String },

	/// Invalid configuration
	InvalidConfig { message: String },

	/// The engine (or a handle it owns) has been closed
	Closed,

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Schema(e) => write!(f, "Schema error: {}", e),
			SyncError::State(e) => write!(f, "State error: {}", e),
			SyncError::MissingBlock { writer_key, index } => {
				write!(f, "Missing block {} in log {}", index, writer_key)
			}
			SyncError::PolicyViolation { message } => {
				write!(f, "Policy violation: {}", message)
			}
			SyncError::HashMismatch { expected, actual } => {
				write!(f, "Hash mismatch: expected {}, got {}", expected, actual)
			}
			SyncError::Log { message } => write!(f, "Log error: {}", message),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::Closed => write!(f, "Engine is closed"),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<SchemaError> for SyncError {
	fn from(e: SchemaError) -> Self {
		SyncError::Schema(e)
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

/// Manifest schema errors
///
/// Fatal for the record they concern; the engine surfaces them and skips
/// the entry.
#[derive(Debug)]
pub enum SchemaError {
	/// Key is neither a user path nor a known system key
	InvalidKey { key: String },

	/// Value kind is not one of the known kinds
	UnknownKind { kind: String },

	/// Value kind is incompatible with its key
	KindMismatch { key: String, kind: &'static str },

	/// A `__peer:` key whose embedded writer key disagrees with the record
	PeerKeyMismatch { key: String, writer_key: String },

	/// Value failed structural validation
	Malformed { key: String, message: String },
}

impl fmt::Display for SchemaError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SchemaError::InvalidKey { key } => write!(f, "Invalid manifest key: {}", key),
			SchemaError::UnknownKind { kind } => write!(f, "Unknown manifest kind: {}", kind),
			SchemaError::KindMismatch { key, kind } => {
				write!(f, "Manifest kind {} not allowed at key {}", kind, key)
			}
			SchemaError::PeerKeyMismatch { key, writer_key } => {
				write!(f, "Peer record at {} names writer key {}", key, writer_key)
			}
			SchemaError::Malformed { key, message } => {
				write!(f, "Malformed manifest value at {}: {}", key, message)
			}
		}
	}
}

impl Error for SchemaError {}

/// Local state store errors
#[derive(Debug)]
pub enum StateError {
	/// Failed to load state
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save state
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// State file is corrupted
	Corrupted { message: String },

	/// The persist queue has shut down
	QueueClosed,
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::LoadFailed { source } => write!(f, "Failed to load state: {}", source),
			StateError::SaveFailed { source } => write!(f, "Failed to save state: {}", source),
			StateError::Corrupted { message } => write!(f, "State corrupted: {}", message),
			StateError::QueueClosed => write!(f, "State persist queue closed"),
		}
	}
}

impl Error for StateError {}

// vim: ts=4
