//! Recovery coordinator.
//!
//! At most one recovery runs at a time. A request that arrives while one is
//! in flight is rejected, not queued: the running recovery already replaces
//! the session the second caller was worried about.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use courier_protocol::SessionState;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::session;
use crate::supervisor::Shared;

/// What asked for the recovery. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTrigger {
	HealthCheck,
	FatalDispatch,
	Disconnected,
	Operator,
}

impl RecoveryTrigger {
	pub fn as_str(self) -> &'static str {
		match self {
			RecoveryTrigger::HealthCheck => "health_check",
			RecoveryTrigger::FatalDispatch => "fatal_dispatch",
			RecoveryTrigger::Disconnected => "disconnected",
			RecoveryTrigger::Operator => "operator",
		}
	}
}

#[derive(Debug, Default)]
pub struct RecoveryCoordinator {
	in_flight: AtomicBool,
	accepted: AtomicU64,
}

impl RecoveryCoordinator {
	pub fn in_flight(&self) -> bool {
		self.in_flight.load(Ordering::Acquire)
	}

	/// Recoveries started since the supervisor was created.
	pub fn accepted(&self) -> u64 {
		self.accepted.load(Ordering::Relaxed)
	}
}

/// Clears the in-flight flag when the recovery task ends, however it ends.
struct InFlight {
	shared: Arc<Shared>,
}

impl Drop for InFlight {
	fn drop(&mut self) {
		self.shared.recovery.in_flight.store(false, Ordering::Release);
	}
}

/// Starts a recovery unless one is already running. Returns whether it was accepted.
///
/// The state moves to `Recovering` before this returns, so a caller that
/// reads the state right after an accepted request never sees the old value.
pub(crate) fn request(shared: &Arc<Shared>, trigger: RecoveryTrigger) -> bool {
	{
		let mut lc = shared.lifecycle.lock();
		if lc.shutting_down {
			return false;
		}
		if shared
			.recovery
			.in_flight
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			info!(target = "courier.recovery", trigger = trigger.as_str(), "recovery already in progress, request rejected");
			return false;
		}
		lc.state = SessionState::Recovering;
		lc.retry_pending = false;
	}

	let guard = InFlight {
		shared: Arc::clone(shared),
	};
	let recoveries = shared.recovery.accepted.fetch_add(1, Ordering::Relaxed) + 1;
	warn!(target = "courier.recovery", trigger = trigger.as_str(), recoveries, "starting session recovery");

	shared
		.scheduler
		.spawn("recovery", async move {
			run(guard, trigger).await;
		})
		.is_some()
}

async fn run(guard: InFlight, trigger: RecoveryTrigger) {
	let shared = &guard.shared;
	let current = shared.lifecycle.lock().handle.clone();

	if let Some(handle) = current {
		handle.teardown(shared.config.teardown_timeout()).await;
		let mut lc = shared.lifecycle.lock();
		if lc.handle_generation() == Some(handle.generation()) {
			lc.handle = None;
		}
	}

	tokio::time::sleep(shared.config.recovery_settle()).await;

	match session::create(shared) {
		Ok(generation) => {
			info!(target = "courier.recovery", trigger = trigger.as_str(), generation, "recovery created a fresh session");
		}
		Err(Error::ShuttingDown) => {}
		Err(err) => {
			error!(target = "courier.recovery", trigger = trigger.as_str(), error = %err, "recovery failed");
		}
	}
}

/// Discards the session and starts over with a fresh attempt budget.
///
/// Unlike [`request`] this ignores the coordinator and also clears a
/// terminal state, so it is the way out of `AuthFailed` or exhausted
/// initialization.
pub(crate) fn full_restart(shared: &Arc<Shared>) -> crate::Result<()> {
	let previous = {
		let mut lc = shared.lifecycle.lock();
		if lc.shutting_down {
			return Err(Error::ShuttingDown);
		}
		lc.init_attempts = 0;
		lc.terminal = None;
		lc.retry_pending = false;
		lc.state = SessionState::Recovering;
		lc.handle.take()
	};

	warn!(
		target = "courier.recovery",
		generation = previous.as_ref().map(|h| h.generation()),
		"full restart requested"
	);

	let task_shared = Arc::clone(shared);
	shared.scheduler.spawn("restart", async move {
		if let Some(handle) = previous {
			handle.teardown(task_shared.config.teardown_timeout()).await;
		}
		tokio::time::sleep(task_shared.config.recovery_settle()).await;
		match session::create(&task_shared) {
			Ok(generation) => info!(target = "courier.recovery", generation, "restart created a fresh session"),
			Err(Error::ShuttingDown) => {}
			Err(err) => warn!(target = "courier.recovery", error = %err, "restart could not create a session"),
		}
	});
	Ok(())
}
