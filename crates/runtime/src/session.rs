//! Session handle and lifecycle bookkeeping.
//!
//! [`Lifecycle`] is the single record of what the supervised session is
//! doing. It is only mutated under its mutex, and never across an `.await`:
//! callers copy out what they need (usually an `Arc<SessionHandle>`), drop
//! the lock, then re-check before acting on the result.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use courier_protocol::{DeliveryReceipt, SessionState};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::driver::{EventSink, Session, SessionEvent, TaggedEvent};
use crate::error::{Error, Result};
use crate::queue;
use crate::recovery::{self, RecoveryTrigger};
use crate::supervisor::{OperatorNotice, Shared};

/// Why the session stopped retrying on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
	AuthFailed,
	AttemptsExhausted,
}

/// Exclusive owner of one session instance.
///
/// A handle is never reused across a recovery: recovery discards it and a
/// fresh handle with a higher generation takes its place.
pub struct SessionHandle {
	generation: u64,
	session: Arc<dyn Session>,
}

impl std::fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionHandle")
			.field("generation", &self.generation)
			.finish_non_exhaustive()
	}
}

impl SessionHandle {
	pub(crate) fn new(generation: u64, session: Arc<dyn Session>) -> Self {
		Self { generation, session }
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Liveness probe bounded by `timeout`. A hung or panicking probe reads as not live.
	pub async fn is_live(&self, timeout: Duration) -> bool {
		let probe = AssertUnwindSafe(self.session.is_live()).catch_unwind();
		match tokio::time::timeout(timeout, probe).await {
			Ok(Ok(live)) => live,
			Ok(Err(_)) => {
				warn!(target = "courier.session", generation = self.generation, "liveness probe panicked");
				false
			}
			Err(_) => {
				debug!(target = "courier.session", generation = self.generation, "liveness probe timed out");
				false
			}
		}
	}

	pub async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt> {
		let send = AssertUnwindSafe(self.session.send_message(recipient, body)).catch_unwind();
		match send.await {
			Ok(result) => result,
			Err(_) => Err(Error::Protocol("session driver panicked during send".into())),
		}
	}

	/// Best-effort shutdown. Never fails; errors and timeouts are logged.
	pub async fn teardown(&self, timeout: Duration) {
		let destroy = AssertUnwindSafe(self.session.destroy()).catch_unwind();
		match tokio::time::timeout(timeout, destroy).await {
			Ok(Ok(Ok(()))) => {
				debug!(target = "courier.session", generation = self.generation, "session torn down");
			}
			Ok(Ok(Err(err))) => {
				warn!(target = "courier.session", generation = self.generation, error = %err, "teardown failed, discarding session anyway");
			}
			Ok(Err(_)) => {
				warn!(target = "courier.session", generation = self.generation, "teardown panicked, discarding session anyway");
			}
			Err(_) => {
				warn!(
					target = "courier.session",
					generation = self.generation,
					timeout_ms = timeout.as_millis() as u64,
					"teardown timed out, discarding session anyway"
				);
			}
		}
	}
}

/// Process-wide session bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
	pub state: SessionState,
	/// Generation of the most recent `create`, 0 before the first one.
	pub generation: u64,
	pub init_attempts: u32,
	/// Unix epoch milliseconds.
	pub last_health_check_at: Option<u64>,
	/// Set by the first `create`; health checks are skipped until then.
	pub initialized: bool,
	pub terminal: Option<Terminal>,
	/// An init retry or reconnect is already scheduled.
	pub retry_pending: bool,
	pub shutting_down: bool,
	pub handle: Option<Arc<SessionHandle>>,
}

impl Lifecycle {
	pub fn handle_generation(&self) -> Option<u64> {
		self.handle.as_ref().map(|h| h.generation)
	}
}

/// Allocates a generation, asks the driver for a session outside the
/// lifecycle lock, installs it, then starts its initialization in the
/// background. Returns the new generation.
///
/// Refuses while another handle is installed: the previous one must be
/// discarded first so two live handles never coexist.
pub(crate) fn create(shared: &Arc<Shared>) -> Result<u64> {
	let generation = {
		let mut lc = shared.lifecycle.lock();
		if lc.shutting_down {
			return Err(Error::ShuttingDown);
		}
		if let Some(generation) = lc.handle_generation() {
			return Err(Error::SessionActive { generation });
		}

		lc.generation += 1;
		lc.init_attempts += 1;
		lc.initialized = true;
		lc.retry_pending = false;
		lc.state = SessionState::Initializing;
		info!(
			target = "courier.session",
			generation = lc.generation,
			attempt = lc.init_attempts,
			max_attempts = shared.config.max_init_attempts,
			"creating session"
		);
		lc.generation
	};

	// May block on a profile dir and a process spawn.
	let sink = EventSink::new(generation, shared.events_tx.clone());
	let session = match shared.driver.create(&shared.config.profile_dir, sink) {
		Ok(session) => session,
		Err(err) => {
			let failure = Error::LaunchFailed(err.to_string());
			let task_shared = Arc::clone(shared);
			shared.scheduler.spawn("create-failed", async move {
				handle_init_failure(&task_shared, generation, failure, false).await;
			});
			return Err(err);
		}
	};

	let handle = Arc::new(SessionHandle::new(generation, Arc::clone(&session)));
	{
		let mut lc = shared.lifecycle.lock();
		// A shutdown, restart or recovery that started during the driver call wins.
		let current = !lc.shutting_down
			&& lc.generation == generation
			&& lc.handle.is_none()
			&& lc.state == SessionState::Initializing;
		if !current {
			let refused = if lc.shutting_down {
				Error::ShuttingDown
			} else {
				Error::SessionActive { generation: lc.generation }
			};
			drop(lc);
			debug!(target = "courier.session", generation, "session created too late, discarding it");
			let timeout = shared.config.teardown_timeout();
			tokio::spawn(async move { handle.teardown(timeout).await });
			return Err(refused);
		}
		lc.handle = Some(Arc::clone(&handle));
	}

	let task_shared = Arc::clone(shared);
	shared.scheduler.spawn("initialize", async move {
		let init = AssertUnwindSafe(session.initialize()).catch_unwind().await;
		let outcome = match init {
			Ok(result) => result,
			Err(_) => Err(Error::InitFailed("driver panicked during initialize".into())),
		};
		match outcome {
			Ok(()) => debug!(target = "courier.session", generation, "initialize returned"),
			Err(err) => handle_init_failure(&task_shared, generation, err, true).await,
		}
	});
	Ok(generation)
}

/// Discards the failed session and either schedules the next attempt with
/// linear backoff or, once attempts are exhausted, parks the session in a
/// terminal `Disconnected` state.
///
/// `installed` is false when `create` itself failed and no handle exists.
async fn handle_init_failure(shared: &Arc<Shared>, generation: u64, err: Error, installed: bool) {
	let (failed, attempt, exhausted) = {
		let mut lc = shared.lifecycle.lock();
		let current = if installed {
			lc.handle_generation() == Some(generation)
		} else {
			lc.generation == generation && lc.handle.is_none()
		};
		if lc.shutting_down || !current || lc.state == SessionState::Recovering {
			debug!(target = "courier.session", generation, error = %err, "ignoring init failure of a replaced session");
			return;
		}

		let failed = if installed { lc.handle.take() } else { None };
		lc.state = SessionState::Disconnected;
		// Already parked by an auth failure; nothing to retry.
		if lc.terminal.is_some() {
			lc.retry_pending = false;
			(failed, lc.init_attempts, None)
		} else {
			let attempt = lc.init_attempts;
			let exhausted = attempt >= shared.config.max_init_attempts;
			if exhausted {
				lc.terminal = Some(Terminal::AttemptsExhausted);
				lc.retry_pending = false;
			} else {
				lc.retry_pending = true;
			}
			(failed, attempt, Some(exhausted))
		}
	};

	if let Some(handle) = failed {
		handle.teardown(shared.config.teardown_timeout()).await;
	}

	let Some(exhausted) = exhausted else {
		debug!(target = "courier.session", generation, error = %err, "init failed after the session went terminal");
		return;
	};

	if exhausted {
		error!(
			target = "courier.session",
			generation,
			attempts = attempt,
			error = %err,
			"session initialization failed, attempts exhausted; restart required"
		);
		let _ = shared.notices.send(OperatorNotice::AttemptsExhausted { attempts: attempt });
		return;
	}

	let delay = shared.config.init_backoff(attempt);
	warn!(
		target = "courier.session",
		generation,
		attempt,
		retry_in_ms = delay.as_millis() as u64,
		error = %err,
		"session initialization failed, retrying"
	);

	let retry_shared = Arc::clone(shared);
	shared.scheduler.schedule("init-retry", delay, async move {
		{
			let mut lc = retry_shared.lifecycle.lock();
			if !lc.retry_pending || lc.terminal.is_some() {
				return;
			}
			lc.retry_pending = false;
		}
		if let Err(err) = create(&retry_shared) {
			warn!(target = "courier.session", error = %err, "init retry could not create a session");
		}
	});
}

/// Applies one lifecycle event. This is the only place events change state.
pub(crate) fn apply_event(shared: &Arc<Shared>, tagged: TaggedEvent) {
	let TaggedEvent { generation, event } = tagged;
	let mut lc = shared.lifecycle.lock();

	// While recovering, the installed handle is the one being torn down and
	// its farewell events carry no information.
	if lc.shutting_down || lc.handle_generation() != Some(generation) || lc.state == SessionState::Recovering {
		debug!(target = "courier.session", generation, ?event, "dropping stale session event");
		return;
	}

	match event {
		SessionEvent::QrNeeded(code) => {
			info!(target = "courier.session", generation, "session needs credential exchange; scan the code");
			drop(lc);
			let _ = shared.notices.send(OperatorNotice::Qr { generation, code });
		}
		SessionEvent::Authenticated => {
			info!(target = "courier.session", generation, "session authenticated");
			lc.state = SessionState::Authenticating;
		}
		SessionEvent::Ready => {
			info!(target = "courier.session", generation, "session ready");
			lc.state = SessionState::Ready;
			lc.init_attempts = 0;
			lc.terminal = None;
			// Only a reconnect can be pending for an installed handle; it is no longer needed.
			lc.retry_pending = false;
			drop(lc);
			queue::kick(shared);
		}
		SessionEvent::AuthFailed(message) => {
			error!(target = "courier.session", generation, %message, "authentication failed; operator action required");
			lc.state = SessionState::Disconnected;
			lc.terminal = Some(Terminal::AuthFailed);
			lc.retry_pending = false;
			drop(lc);
			let _ = shared.notices.send(OperatorNotice::AuthFailed { generation, message });
		}
		SessionEvent::Disconnected(reason) => {
			lc.state = SessionState::Disconnected;
			if lc.terminal.is_some() || lc.retry_pending || shared.recovery.in_flight() {
				warn!(target = "courier.session", generation, %reason, "session disconnected");
				return;
			}
			// Cleared by a `Ready` from this session, which cancels the reconnect.
			lc.retry_pending = true;
			drop(lc);

			let delay = shared.config.reconnect_delay();
			warn!(
				target = "courier.session",
				generation,
				%reason,
				reconnect_in_ms = delay.as_millis() as u64,
				"session disconnected, scheduling reconnect"
			);
			let reconnect_shared = Arc::clone(shared);
			shared.scheduler.schedule("reconnect", delay, async move {
				{
					let mut lc = reconnect_shared.lifecycle.lock();
					if !lc.retry_pending {
						return;
					}
					lc.retry_pending = false;
				}
				recovery::request(&reconnect_shared, RecoveryTrigger::Disconnected);
			});
		}
	}
}

/// The installed handle, but only while the session is `Ready`.
pub(crate) fn ready_handle(shared: &Shared) -> Option<Arc<SessionHandle>> {
	let lc = shared.lifecycle.lock();
	if lc.shutting_down || !lc.state.is_ready() {
		return None;
	}
	lc.handle.clone()
}

/// Moves a `Ready` session of `generation` to `Degraded`.
pub(crate) fn mark_degraded(shared: &Shared, generation: u64) {
	let mut lc = shared.lifecycle.lock();
	if lc.state.is_ready() && lc.handle_generation() == Some(generation) {
		lc.state = SessionState::Degraded;
	}
}
