//! Session driver abstraction.
//!
//! The supervisor never talks to an automation library directly. It asks a
//! [`SessionDriver`] for a fresh [`Session`] and drives it through
//! `initialize`, `is_live`, `send_message` and `destroy`. Lifecycle callbacks
//! from the library are funnelled into an [`EventSink`], which tags every
//! event with the generation of the session that produced it so events from
//! a replaced session can be ignored.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use courier_protocol::DeliveryReceipt;
use tokio::sync::mpsc;

use crate::error::Result;

/// Lifecycle event emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	/// A credential-exchange artifact (e.g. QR payload) for the operator.
	QrNeeded(String),
	/// Persisted credentials were accepted.
	Authenticated,
	/// The session can send.
	Ready,
	/// Credentials were rejected. Terminal until an operator restarts.
	AuthFailed(String),
	/// The session dropped its connection.
	Disconnected(String),
}

/// A [`SessionEvent`] stamped with the generation of its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
	pub generation: u64,
	pub event: SessionEvent,
}

/// Sender half handed to a session at creation time.
#[derive(Debug, Clone)]
pub struct EventSink {
	generation: u64,
	tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
	pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
		Self { generation, tx }
	}

	/// Creates a sink with its own receiver, for driving a session outside a supervisor.
	pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self::new(generation, tx), rx)
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns false once the supervisor stopped listening.
	pub fn emit(&self, event: SessionEvent) -> bool {
		self.tx
			.send(TaggedEvent {
				generation: self.generation,
				event,
			})
			.is_ok()
	}
}

/// Factory for sessions.
///
/// `create` must return quickly: it allocates the session object but does
/// not wait for it to become usable. Slow startup belongs in
/// [`Session::initialize`].
pub trait SessionDriver: Send + Sync + 'static {
	/// Allocates a session bound to `profile_dir`, reporting lifecycle events to `events`.
	fn create(&self, profile_dir: &Path, events: EventSink) -> Result<Arc<dyn Session>>;
}

/// One instance of the external automated session.
#[async_trait]
pub trait Session: Send + Sync {
	/// Starts the session. Completion does not imply readiness; that is
	/// signalled by [`SessionEvent::Ready`].
	async fn initialize(&self) -> Result<()>;

	/// Best-effort liveness probe. `true` does not guarantee the next send succeeds.
	async fn is_live(&self) -> bool;

	/// Sends `body` to `recipient`.
	async fn send_message(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt>;

	/// Requests graceful shutdown. Callers log and ignore failures.
	async fn destroy(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sink_tags_generation() {
		let (sink, mut rx) = EventSink::channel(4);
		assert!(sink.emit(SessionEvent::Ready));

		let tagged = rx.try_recv().unwrap();
		assert_eq!(tagged.generation, 4);
		assert_eq!(tagged.event, SessionEvent::Ready);
	}

	#[test]
	fn emit_reports_closed_receiver() {
		let (sink, rx) = EventSink::channel(1);
		drop(rx);
		assert!(!sink.emit(SessionEvent::Authenticated));
	}
}
