//! Wire types for the courier gateway.
//!
//! Three audiences share these types:
//!
//! - the HTTP facade and its clients ([`HealthSnapshot`], [`SendRequest`],
//!   [`DeliveryReceipt`], [`FailureBody`], ...)
//! - the supervisor core, which reports [`SessionState`] and [`FailureCode`]
//! - automation bridges, which speak the newline-delimited JSON protocol in
//!   [`bridge`]
//!
//! # Main Types
//!
//! - [`SessionState`] - Lifecycle state of the single supervised session
//! - [`HealthSnapshot`] - Point-in-time view of session, queue and recovery
//! - [`DeliveryReceipt`] - Result of a successful send
//! - [`FailureCode`] - Structured reason a send did not succeed

pub mod bridge;
mod delivery;
mod session;

pub use delivery::{
	ClearedQueue, DeliveryReceipt, FailureBody, FailureCode, FailureDetail, RecoveryAck,
	RestartAck, SendRequest,
};
pub use session::{HealthSnapshot, SessionState};
