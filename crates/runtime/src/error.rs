//! Error types for the courier runtime.

use courier_protocol::FailureCode;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by session drivers and the supervisor.
#[derive(Debug, Error)]
pub enum Error {
	/// The driver could not allocate a session (process spawn, profile dir, ...).
	#[error("Failed to launch session: {0}")]
	LaunchFailed(String),

	/// The session started but never became usable.
	#[error("Session initialization failed: {0}")]
	InitFailed(String),

	/// Error reported by the automation layer with its structured code.
	#[error("{code}: {message}")]
	Remote {
		/// Machine-readable error class (e.g. `session_closed`).
		code: String,
		/// Human-readable error message
		message: String,
	},

	/// The transport to the session is gone (pipe closed, process exited).
	#[error("Session transport closed: {0}")]
	TransportClosed(String),

	/// Protocol-level error (malformed line, unknown response id).
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// A session handle is still installed; it must be discarded first.
	#[error("A session handle is already installed (generation {generation})")]
	SessionActive { generation: u64 },

	/// Operation refused because shutdown has begun.
	#[error("Supervisor is shutting down")]
	ShuttingDown,

	/// Timeout waiting for a driver operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Invalid configuration value.
	#[error("Invalid configuration: {0}")]
	Config(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns the structured code if this is a Remote error.
	pub fn remote_code(&self) -> Option<&str> {
		match self {
			Error::Remote { code, .. } => Some(code),
			_ => None,
		}
	}

	/// Returns true if the transport itself failed, independent of any code policy.
	pub fn is_transport_closed(&self) -> bool {
		matches!(self, Error::TransportClosed(_))
	}
}

/// Reason a queued send did not produce a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
	#[error("session is not ready: {0}")]
	NotReady(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("session failed while sending: {0}")]
	SessionFatal(String),

	#[error("not dispatched within {after_ms}ms")]
	Timeout { after_ms: u64 },

	#[error("send failed: {0}")]
	Dispatch(String),

	#[error("gateway is shutting down")]
	ShuttingDown,
}

impl SendFailure {
	pub fn code(&self) -> FailureCode {
		match self {
			SendFailure::NotReady(_) => FailureCode::NotReady,
			SendFailure::InvalidInput(_) => FailureCode::InvalidInput,
			SendFailure::SessionFatal(_) => FailureCode::SessionFatal,
			SendFailure::Timeout { .. } => FailureCode::Timeout,
			SendFailure::Dispatch(_) => FailureCode::DispatchFailed,
			SendFailure::ShuttingDown => FailureCode::ShuttingDown,
		}
	}
}
