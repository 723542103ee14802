//! Courier Runtime - session supervision and ordered delivery
//!
//! This crate keeps one flaky, single-concurrency automated session usable
//! and serializes sends through it:
//!
//! - **Session lifecycle**: create, initialize with bounded retries, apply
//!   lifecycle events, tear down
//! - **Health monitor**: periodic liveness probe that degrades the session
//! - **Recovery coordinator**: replaces the session, one recovery at a time
//! - **Delivery queue**: FIFO with deadlines, pacing, and exactly-once settlement
//! - **Bridge driver**: runs an automation bridge process over stdio
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          Supervisor          │  Public operations
//! │  ┌────────┐    ┌──────────┐  │
//! │  │ Health │───►│ Recovery │  │  One recovery in flight
//! │  └────────┘    └────┬─────┘  │
//! │  ┌────────┐    ┌────▼─────┐  │
//! │  │ Queue  │───►│ Session  │  │  Generation-tagged handle
//! │  └────────┘    └────┬─────┘  │
//! └─────────────────────┼────────┘
//!                ┌──────▼──────┐
//!                │SessionDriver│  Bridge process, or a fake in tests
//!                └─────────────┘
//! ```
//!
//! All timers go through one [`Scheduler`](scheduler::Scheduler), so
//! [`Supervisor::shutdown`] stops every pending retry, reconnect and deadline.

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
mod health;
mod queue;
mod recovery;
pub mod scheduler;
mod session;
mod supervisor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::BridgeDriver;
pub use config::{BridgeConfig, ErrorClass, ErrorPolicy, SupervisorConfig};
pub use driver::{EventSink, Session, SessionDriver, SessionEvent, TaggedEvent};
pub use error::{Error, Result, SendFailure};
pub use health::CheckOutcome;
pub use supervisor::{OperatorNotice, Supervisor};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}
