//! Periodic liveness probe.

use std::sync::Arc;

use courier_protocol::SessionState;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::recovery::{self, RecoveryTrigger};
use crate::supervisor::Shared;

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
	/// Never initialized, or shutting down.
	Skipped,
	Healthy,
	Unhealthy { recovery_requested: bool },
}

/// Runs [`check`] every `healthIntervalMs` until shutdown.
///
/// The first check happens one full interval after start, not immediately.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
	let mut timer = tokio::time::interval(shared.config.health_interval());
	timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
	timer.tick().await;

	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			_ = timer.tick() => {}
		}
		if *shutdown.borrow() {
			break;
		}
		check(&shared).await;
	}
	debug!(target = "courier.health", "health monitor stopped");
}

pub(crate) async fn check(shared: &Arc<Shared>) -> CheckOutcome {
	let handle = {
		let mut lc = shared.lifecycle.lock();
		if !lc.initialized || lc.shutting_down {
			return CheckOutcome::Skipped;
		}
		lc.last_health_check_at = Some(crate::now_ms());
		lc.handle.clone()
	};

	let live = match &handle {
		Some(handle) => handle.is_live(shared.config.probe_timeout()).await,
		None => false,
	};

	let mut lc = shared.lifecycle.lock();
	if lc.shutting_down {
		return CheckOutcome::Skipped;
	}
	// The handle may have been replaced while the probe ran; judge the current one.
	let same_handle = handle.as_ref().map(|h| h.generation()) == lc.handle_generation();
	if !same_handle {
		debug!(target = "courier.health", "handle replaced during probe, skipping verdict");
		return CheckOutcome::Skipped;
	}

	let healthy = live && lc.state != SessionState::Disconnected;
	if healthy {
		debug!(target = "courier.health", state = %lc.state, generation = lc.handle_generation(), "health check passed");
		return CheckOutcome::Healthy;
	}

	if lc.state == SessionState::Ready {
		lc.state = SessionState::Degraded;
	}
	let state = lc.state;
	// Terminal sessions are left to the operator, pending retries to their backoff.
	let hold_off = lc.terminal.is_some() || lc.retry_pending || state == SessionState::Recovering;
	drop(lc);

	warn!(
		target = "courier.health",
		%state,
		live,
		has_handle = handle.is_some(),
		"health check failed"
	);

	if hold_off || shared.recovery.in_flight() {
		return CheckOutcome::Unhealthy {
			recovery_requested: false,
		};
	}

	let accepted = recovery::request(shared, RecoveryTrigger::HealthCheck);
	CheckOutcome::Unhealthy {
		recovery_requested: accepted,
	}
}
