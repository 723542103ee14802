//! Process-wide supervisor.
//!
//! [`Supervisor`] wires the session lifecycle, health monitor, recovery
//! coordinator and delivery queue around one [`Shared`] state block and
//! exposes the operations the gateway needs.

use std::sync::Arc;

use courier_protocol::{ClearedQueue, DeliveryReceipt, HealthSnapshot, RecoveryAck, SessionState};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::driver::{SessionDriver, TaggedEvent};
use crate::error::{Result, SendFailure};
use crate::health::{self, CheckOutcome};
use crate::queue::{self, DeliveryQueue};
use crate::recovery::{self, RecoveryCoordinator, RecoveryTrigger};
use crate::scheduler::Scheduler;
use crate::session::{self, Lifecycle};

const NOTICE_CAPACITY: usize = 16;

/// Something an operator has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorNotice {
	/// Credential-exchange artifact to scan.
	Qr { generation: u64, code: String },
	/// Credentials were rejected; a restart after re-authenticating is required.
	AuthFailed { generation: u64, message: String },
	/// Initialization kept failing; a restart is required.
	AttemptsExhausted { attempts: u32 },
}

/// State shared by every supervisor task.
pub(crate) struct Shared {
	pub config: SupervisorConfig,
	pub driver: Arc<dyn SessionDriver>,
	pub lifecycle: Mutex<Lifecycle>,
	pub events_tx: mpsc::UnboundedSender<TaggedEvent>,
	pub scheduler: Arc<Scheduler>,
	pub notices: broadcast::Sender<OperatorNotice>,
	pub recovery: RecoveryCoordinator,
	pub queue: DeliveryQueue,
	pub shutdown: watch::Sender<bool>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Supervisor {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Supervisor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Supervisor")
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Supervisor {
	/// Validates `config`, starts the event and health tasks, and creates the first session.
	///
	/// A failed first `create` is not an error here: it goes through the
	/// normal init-retry path and shows up in the health snapshot.
	pub fn start(config: SupervisorConfig, driver: Arc<dyn SessionDriver>) -> Result<Self> {
		config.validate()?;

		let (events_tx, mut events_rx) = mpsc::unbounded_channel();
		let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
		let (shutdown, shutdown_rx) = watch::channel(false);

		let shared = Arc::new(Shared {
			config,
			driver,
			lifecycle: Mutex::new(Lifecycle::default()),
			events_tx,
			scheduler: Scheduler::new(),
			notices,
			recovery: RecoveryCoordinator::default(),
			queue: DeliveryQueue::default(),
			shutdown,
		});

		let events_shared = Arc::clone(&shared);
		shared.scheduler.spawn("events", async move {
			while let Some(event) = events_rx.recv().await {
				session::apply_event(&events_shared, event);
			}
		});

		let health_shared = Arc::clone(&shared);
		shared.scheduler.spawn("health", health::run(health_shared, shutdown_rx));

		info!(
			target = "courier.supervisor",
			profile_dir = %shared.config.profile_dir.display(),
			health_interval_ms = shared.config.health_interval_ms,
			"supervisor started"
		);

		if let Err(err) = session::create(&shared) {
			warn!(target = "courier.supervisor", error = %err, "initial session create failed");
		}

		Ok(Self { shared })
	}

	pub fn state(&self) -> SessionState {
		self.shared.lifecycle.lock().state
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.shared.config
	}

	/// Point-in-time view. Probes the handle, so it can take up to `probeTimeoutMs`.
	pub async fn health_snapshot(&self) -> HealthSnapshot {
		let (handle, state, last_health_check_at, generation, init_attempts, terminal) = {
			let lc = self.shared.lifecycle.lock();
			(
				lc.handle.clone(),
				lc.state,
				lc.last_health_check_at,
				lc.generation,
				lc.init_attempts,
				lc.terminal.is_some(),
			)
		};

		let is_live = match handle {
			Some(handle) => handle.is_live(self.shared.config.probe_timeout()).await,
			None => false,
		};

		HealthSnapshot {
			state,
			is_live,
			queue_length: self.shared.queue.len(),
			processing: self.shared.queue.processing(),
			last_health_check_at,
			recovery_in_flight: self.shared.recovery.in_flight(),
			generation,
			init_attempts,
			terminal,
			recoveries: self.shared.recovery.accepted(),
		}
	}

	/// Runs one health check now, outside the periodic schedule.
	pub async fn check_health(&self) -> CheckOutcome {
		health::check(&self.shared).await
	}

	/// Queues a send and waits for its single outcome.
	pub async fn enqueue_send(&self, recipient: &str, body: &str) -> std::result::Result<DeliveryReceipt, SendFailure> {
		let rx = queue::enqueue(&self.shared, recipient, body)?;
		match rx.await {
			Ok(reply) => reply,
			// The settlement cell was dropped unsettled, which only happens when shutdown aborted its timer.
			Err(_) => Err(SendFailure::ShuttingDown),
		}
	}

	pub fn request_manual_recovery(&self) -> RecoveryAck {
		RecoveryAck {
			accepted: recovery::request(&self.shared, RecoveryTrigger::Operator),
		}
	}

	pub fn clear_queue(&self) -> ClearedQueue {
		let cleared_count = self.shared.queue.clear();
		info!(target = "courier.supervisor", cleared_count, "queue cleared");
		ClearedQueue { cleared_count }
	}

	pub fn request_full_restart(&self) -> Result<()> {
		recovery::full_restart(&self.shared)
	}

	pub fn subscribe_notices(&self) -> broadcast::Receiver<OperatorNotice> {
		self.shared.notices.subscribe()
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shared.lifecycle.lock().shutting_down
	}

	/// Stops the health monitor, tears down the session, cancels every timer
	/// and fails whatever is still queued. Idempotent.
	pub async fn shutdown(&self) {
		let handle = {
			let mut lc = self.shared.lifecycle.lock();
			if lc.shutting_down {
				return;
			}
			lc.shutting_down = true;
			lc.retry_pending = false;
			lc.handle.take()
		};
		info!(target = "courier.supervisor", "shutting down");

		let _ = self.shared.shutdown.send(true);
		let cancelled = self.shared.scheduler.cancel_all();
		debug!(target = "courier.supervisor", cancelled, "cancelled scheduled tasks");

		if let Some(handle) = handle {
			handle.teardown(self.shared.config.teardown_timeout()).await;
		}

		let failed = self.shared.queue.fail_all(SendFailure::ShuttingDown);
		if failed > 0 {
			info!(target = "courier.supervisor", failed, "failed queued tasks on shutdown");
		}
	}
}
