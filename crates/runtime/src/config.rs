//! Supervisor and bridge configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! overrides. Durations are stored as milliseconds and exposed as
//! [`Duration`] accessors.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timing and retry policy for the supervised session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
	/// Profile directory the session is bound to, so a benign restart keeps
	/// its authentication.
	pub profile_dir: PathBuf,
	pub max_init_attempts: u32,
	/// Retry `n` waits `n * initBackoffBaseMs`.
	pub init_backoff_base_ms: u64,
	pub reconnect_delay_ms: u64,
	pub health_interval_ms: u64,
	pub recovery_settle_ms: u64,
	pub task_timeout_ms: u64,
	pub dispatch_pacing_ms: u64,
	pub probe_timeout_ms: u64,
	pub teardown_timeout_ms: u64,
	pub errors: ErrorPolicy,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			profile_dir: PathBuf::from(".courier/session"),
			max_init_attempts: 3,
			init_backoff_base_ms: 5_000,
			reconnect_delay_ms: 10_000,
			health_interval_ms: 30_000,
			recovery_settle_ms: 3_000,
			task_timeout_ms: 120_000,
			dispatch_pacing_ms: 1_000,
			probe_timeout_ms: 10_000,
			teardown_timeout_ms: 15_000,
			errors: ErrorPolicy::default(),
		}
	}
}

impl SupervisorConfig {
	pub fn validate(&self) -> Result<()> {
		if self.max_init_attempts == 0 {
			return Err(Error::Config("maxInitAttempts must be at least 1".into()));
		}
		if self.health_interval_ms == 0 {
			return Err(Error::Config("healthIntervalMs must be positive".into()));
		}
		if self.task_timeout_ms == 0 {
			return Err(Error::Config("taskTimeoutMs must be positive".into()));
		}
		Ok(())
	}

	/// Delay before retry number `attempt` (1-based).
	pub fn init_backoff(&self, attempt: u32) -> Duration {
		Duration::from_millis(self.init_backoff_base_ms.saturating_mul(u64::from(attempt)))
	}

	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_delay_ms)
	}

	pub fn health_interval(&self) -> Duration {
		Duration::from_millis(self.health_interval_ms)
	}

	pub fn recovery_settle(&self) -> Duration {
		Duration::from_millis(self.recovery_settle_ms)
	}

	pub fn task_timeout(&self) -> Duration {
		Duration::from_millis(self.task_timeout_ms)
	}

	pub fn dispatch_pacing(&self) -> Duration {
		Duration::from_millis(self.dispatch_pacing_ms)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_millis(self.probe_timeout_ms)
	}

	pub fn teardown_timeout(&self) -> Duration {
		Duration::from_millis(self.teardown_timeout_ms)
	}
}

/// How a failed send is treated, keyed on the structured error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// Spurious error after a send that did happen; reported as success.
	Benign,
	/// The session is unusable; fail the task and recover.
	SessionFatal,
	Other,
}

/// Code lists used to classify dispatch errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorPolicy {
	pub fatal_error_codes: Vec<String>,
	pub benign_error_codes: Vec<String>,
}

impl Default for ErrorPolicy {
	fn default() -> Self {
		Self {
			fatal_error_codes: vec!["session_closed".into(), "target_closed".into()],
			benign_error_codes: vec!["evaluation_noise".into()],
		}
	}
}

impl ErrorPolicy {
	pub fn classify(&self, err: &Error) -> ErrorClass {
		if err.is_transport_closed() {
			return ErrorClass::SessionFatal;
		}
		match err.remote_code() {
			Some(code) if self.benign_error_codes.iter().any(|c| c == code) => ErrorClass::Benign,
			Some(code) if self.fatal_error_codes.iter().any(|c| c == code) => {
				ErrorClass::SessionFatal
			}
			_ => ErrorClass::Other,
		}
	}
}

/// Command line used to start an automation bridge process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
	pub program: String,
	pub args: Vec<String>,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub env: BTreeMap<String, String>,
	/// How long `initialize` may take before it counts as a failed attempt.
	pub initialize_timeout_ms: u64,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			program: "node".into(),
			args: vec!["bridge.js".into()],
			env: BTreeMap::new(),
			initialize_timeout_ms: 180_000,
		}
	}
}

impl BridgeConfig {
	pub fn initialize_timeout(&self) -> Duration {
		Duration::from_millis(self.initialize_timeout_ms)
	}
}
