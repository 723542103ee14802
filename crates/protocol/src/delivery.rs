use serde::{Deserialize, Serialize};

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
	/// Opaque channel address, passed through to the session unchanged.
	pub recipient: String,
	pub body: String,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
	pub delivery_id: String,
	/// Unix epoch milliseconds reported by the session (or synthesized).
	pub timestamp: u64,
}

/// Structured reason a send did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
	/// The session is in a terminal state and needs operator action.
	NotReady,
	InvalidInput,
	/// The session died while sending; recovery was requested.
	SessionFatal,
	/// The task's deadline elapsed before it was dispatched.
	Timeout,
	/// The session rejected the send for a non-fatal reason.
	DispatchFailed,
	ShuttingDown,
}

impl FailureCode {
	pub fn as_str(self) -> &'static str {
		match self {
			FailureCode::NotReady => "not_ready",
			FailureCode::InvalidInput => "invalid_input",
			FailureCode::SessionFatal => "session_fatal",
			FailureCode::Timeout => "timeout",
			FailureCode::DispatchFailed => "dispatch_failed",
			FailureCode::ShuttingDown => "shutting_down",
		}
	}
}

impl std::fmt::Display for FailureCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
	pub code: FailureCode,
	pub message: String,
}

/// Error body returned by every failing HTTP route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBody {
	pub error: FailureDetail,
}

impl FailureBody {
	pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
		Self {
			error: FailureDetail {
				code,
				message: message.into(),
			},
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAck {
	/// False when a recovery was already in flight.
	pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartAck {
	pub restarted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedQueue {
	pub cleared_count: usize,
}
