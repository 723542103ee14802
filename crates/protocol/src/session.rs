use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised session.
///
/// Exactly one state exists per gateway process. [`Ready`](Self::Ready) is the
/// only state in which queued messages are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// No session has been created yet.
	#[default]
	Uninitialized,
	/// A session was created and is starting up.
	Initializing,
	/// Stored credentials were accepted; the session is not usable yet.
	Authenticating,
	/// The session accepts sends.
	Ready,
	/// A health check failed while the session was ready.
	Degraded,
	/// The session dropped, failed to authenticate, or ran out of init attempts.
	Disconnected,
	/// The previous session is being torn down and replaced.
	Recovering,
}

impl SessionState {
	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Uninitialized => "uninitialized",
			SessionState::Initializing => "initializing",
			SessionState::Authenticating => "authenticating",
			SessionState::Ready => "ready",
			SessionState::Degraded => "degraded",
			SessionState::Disconnected => "disconnected",
			SessionState::Recovering => "recovering",
		}
	}

	pub fn is_ready(self) -> bool {
		self == SessionState::Ready
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Point-in-time view of the supervisor, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
	pub state: SessionState,
	/// Result of an on-demand liveness probe. Advisory only.
	pub is_live: bool,
	pub queue_length: usize,
	/// Whether the drain loop is currently active.
	pub processing: bool,
	/// Unix epoch milliseconds of the last health check that ran.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_health_check_at: Option<u64>,
	pub recovery_in_flight: bool,
	/// Generation of the installed session handle, 0 before the first create.
	pub generation: u64,
	pub init_attempts: u32,
	/// True once authentication failed or init attempts were exhausted.
	pub terminal: bool,
	/// Number of recoveries accepted since the process started.
	pub recoveries: u64,
}
