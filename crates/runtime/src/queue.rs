//! Delivery queue.
//!
//! Sends are serialized through one drain loop because the external session
//! cannot handle overlapping operations. The loop only dispatches while the
//! session is `Ready`; otherwise it stops and leaves the head in place until
//! the `ready` event kicks it again.
//!
//! Every task is settled exactly once. [`Settlement`] is the only place a
//! task's outcome is written, and the first writer wins: dispatch, deadline
//! expiry and shutdown all race through it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use courier_protocol::{DeliveryReceipt, FailureCode};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ErrorClass;
use crate::error::SendFailure;
use crate::recovery::{self, RecoveryTrigger};
use crate::scheduler::TimerHandle;
use crate::session::{self, SessionHandle};
use crate::supervisor::Shared;

/// Outcome delivered to the caller of `enqueue_send`.
pub type Reply = Result<DeliveryReceipt, SendFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
	Delivered,
	Failed(FailureCode),
}

#[derive(Debug)]
enum TaskState {
	Pending(oneshot::Sender<Reply>),
	Settled(Settled),
}

/// Exactly-once settlement cell shared by a task, its deadline timer and the drain loop.
#[derive(Debug)]
pub struct Settlement {
	state: Mutex<TaskState>,
}

impl Settlement {
	fn new() -> (Arc<Self>, oneshot::Receiver<Reply>) {
		let (tx, rx) = oneshot::channel();
		let cell = Arc::new(Self {
			state: Mutex::new(TaskState::Pending(tx)),
		});
		(cell, rx)
	}

	/// Settles the task. Returns false if it was already settled.
	pub fn settle(&self, outcome: Reply) -> bool {
		let mut state = self.state.lock();
		let settled = match &outcome {
			Ok(_) => Settled::Delivered,
			Err(failure) => Settled::Failed(failure.code()),
		};
		match std::mem::replace(&mut *state, TaskState::Settled(settled)) {
			TaskState::Pending(tx) => {
				// The caller may have stopped waiting; the task still counts as settled.
				let _ = tx.send(outcome);
				true
			}
			previous @ TaskState::Settled(_) => {
				*state = previous;
				false
			}
		}
	}

	pub fn is_settled(&self) -> bool {
		matches!(*self.state.lock(), TaskState::Settled(_))
	}

	pub fn outcome(&self) -> Option<Settled> {
		match *self.state.lock() {
			TaskState::Pending(_) => None,
			TaskState::Settled(settled) => Some(settled),
		}
	}
}

struct QueueTask {
	id: u64,
	recipient: String,
	body: String,
	enqueued_at: Instant,
	settlement: Arc<Settlement>,
	deadline: Option<TimerHandle>,
}

#[derive(Default)]
pub struct DeliveryQueue {
	tasks: Mutex<VecDeque<QueueTask>>,
	processing: AtomicBool,
	next_id: AtomicU64,
}

impl DeliveryQueue {
	pub fn len(&self) -> usize {
		self.tasks.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.tasks.lock().is_empty()
	}

	/// True while a drain loop is running.
	pub fn processing(&self) -> bool {
		self.processing.load(Ordering::Acquire)
	}

	/// Removes every queued task without settling it. Returns how many were removed.
	///
	/// Deadline timers keep running, so each caller still resolves with a timeout.
	pub fn clear(&self) -> usize {
		let cleared = std::mem::take(&mut *self.tasks.lock());
		cleared.len()
	}

	/// Empties the queue and settles everything in it with `failure`.
	pub(crate) fn fail_all(&self, failure: SendFailure) -> usize {
		let drained = std::mem::take(&mut *self.tasks.lock());
		drained
			.into_iter()
			.filter(|task| task.settlement.settle(Err(failure.clone())))
			.count()
	}
}

/// Appends a send task and kicks the drain loop.
///
/// Fails synchronously on invalid input, a terminal session, or shutdown;
/// otherwise the returned receiver yields the task's single outcome.
pub(crate) fn enqueue(
	shared: &Arc<Shared>,
	recipient: &str,
	body: &str,
) -> Result<oneshot::Receiver<Reply>, SendFailure> {
	if recipient.trim().is_empty() {
		return Err(SendFailure::InvalidInput("recipient must not be empty".into()));
	}
	if body.trim().is_empty() {
		return Err(SendFailure::InvalidInput("body must not be empty".into()));
	}
	{
		let lc = shared.lifecycle.lock();
		if lc.shutting_down {
			return Err(SendFailure::ShuttingDown);
		}
		if let Some(terminal) = lc.terminal {
			return Err(SendFailure::NotReady(format!(
				"session stopped ({terminal:?}); restart required"
			)));
		}
	}

	let queue = &shared.queue;
	let id = queue.next_id.fetch_add(1, Ordering::Relaxed) + 1;
	let (settlement, rx) = Settlement::new();

	let timeout = shared.config.task_timeout();
	let after_ms = timeout.as_millis() as u64;
	let timer_shared = Arc::clone(shared);
	let timer_settlement = Arc::clone(&settlement);
	let deadline = shared.scheduler.schedule("deadline", timeout, async move {
		if timer_settlement.settle(Err(SendFailure::Timeout { after_ms })) {
			info!(target = "courier.queue", task = id, after_ms, "task deadline expired");
		}
		timer_shared.queue.tasks.lock().retain(|task| task.id != id);
	});
	if deadline.is_none() {
		return Err(SendFailure::ShuttingDown);
	}

	let queue_length = {
		let mut tasks = queue.tasks.lock();
		tasks.push_back(QueueTask {
			id,
			recipient: recipient.to_owned(),
			body: body.to_owned(),
			enqueued_at: Instant::now(),
			settlement,
			deadline,
		});
		tasks.len()
	};
	debug!(target = "courier.queue", task = id, queue_length, "task enqueued");

	kick(shared);
	Ok(rx)
}

/// Starts the drain loop unless one is already running.
pub(crate) fn kick(shared: &Arc<Shared>) {
	if shared
		.queue
		.processing
		.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
		.is_err()
	{
		return;
	}

	let task_shared = Arc::clone(shared);
	let spawned = shared.scheduler.spawn("drain", async move {
		drain(&task_shared).await;
	});
	if spawned.is_none() {
		shared.queue.processing.store(false, Ordering::Release);
	}
}

async fn drain(shared: &Arc<Shared>) {
	let pacing = shared.config.dispatch_pacing();

	loop {
		// Re-check the handle before every dispatch; recovery may have taken it.
		let Some(handle) = session::ready_handle(shared) else {
			trace!(target = "courier.queue", queue_length = shared.queue.len(), "session not ready, drain stalled");
			break;
		};

		let Some(task) = next_pending(&shared.queue) else {
			break;
		};

		dispatch(shared, &handle, task).await;

		if !pacing.is_zero() {
			tokio::time::sleep(pacing).await;
		}
	}

	shared.queue.processing.store(false, Ordering::Release);

	// A `ready` that arrived while this loop was winding down found the flag set.
	if !shared.queue.is_empty() && session::ready_handle(shared).is_some() {
		kick(shared);
	}
}

/// Pops the first task that is still pending, discarding expired ones.
fn next_pending(queue: &DeliveryQueue) -> Option<QueueTask> {
	let mut tasks = queue.tasks.lock();
	while let Some(task) = tasks.pop_front() {
		if task.settlement.is_settled() {
			trace!(target = "courier.queue", task = task.id, "discarding settled task");
			continue;
		}
		return Some(task);
	}
	None
}

async fn dispatch(shared: &Arc<Shared>, handle: &SessionHandle, task: QueueTask) {
	let QueueTask {
		id,
		recipient,
		body,
		enqueued_at,
		settlement,
		deadline,
	} = task;

	// An expired task must never reach the session.
	if settlement.is_settled() {
		return;
	}

	let waited: Duration = enqueued_at.elapsed();
	debug!(
		target = "courier.queue",
		task = id,
		generation = handle.generation(),
		waited_ms = waited.as_millis() as u64,
		"dispatching"
	);

	let outcome = match handle.send(&recipient, &body).await {
		Ok(receipt) => Ok(receipt),
		Err(err) => match shared.config.errors.classify(&err) {
			ErrorClass::Benign => {
				warn!(target = "courier.queue", task = id, error = %err, "masking benign send error");
				Ok(DeliveryReceipt {
					delivery_id: format!("unconfirmed-{id}"),
					timestamp: crate::now_ms(),
				})
			}
			ErrorClass::SessionFatal => {
				warn!(
					target = "courier.queue",
					task = id,
					generation = handle.generation(),
					error = %err,
					"session-fatal send error"
				);
				session::mark_degraded(shared, handle.generation());
				recovery::request(shared, RecoveryTrigger::FatalDispatch);
				Err(SendFailure::SessionFatal(err.to_string()))
			}
			ErrorClass::Other => {
				warn!(target = "courier.queue", task = id, error = %err, "send failed");
				Err(SendFailure::Dispatch(err.to_string()))
			}
		},
	};

	let delivered = outcome.is_ok();
	if settlement.settle(outcome) {
		debug!(target = "courier.queue", task = id, delivered, "task settled");
	} else {
		info!(
			target = "courier.queue",
			task = id,
			delivered,
			settled = ?settlement.outcome(),
			"send finished after the task was already settled"
		);
	}

	if let Some(timer) = deadline {
		timer.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn receipt() -> DeliveryReceipt {
		DeliveryReceipt {
			delivery_id: "d-1".into(),
			timestamp: 1,
		}
	}

	#[tokio::test]
	async fn first_settlement_wins() {
		let (cell, rx) = Settlement::new();
		assert!(!cell.is_settled());

		assert!(cell.settle(Err(SendFailure::Timeout { after_ms: 10 })));
		assert!(!cell.settle(Ok(receipt())));
		assert_eq!(cell.outcome(), Some(Settled::Failed(FailureCode::Timeout)));

		assert_eq!(rx.await.unwrap(), Err(SendFailure::Timeout { after_ms: 10 }));
	}

	#[test]
	fn settling_without_a_listener_still_counts() {
		let (cell, rx) = Settlement::new();
		drop(rx);
		assert!(cell.settle(Ok(receipt())));
		assert_eq!(cell.outcome(), Some(Settled::Delivered));
	}

	#[test]
	fn next_pending_skips_settled_heads() {
		let queue = DeliveryQueue::default();
		let mut receivers = Vec::new();
		{
			let mut tasks = queue.tasks.lock();
			for id in 1..=3 {
				let (settlement, rx) = Settlement::new();
				receivers.push(rx);
				tasks.push_back(QueueTask {
					id,
					recipient: "r".into(),
					body: "b".into(),
					enqueued_at: Instant::now(),
					settlement,
					deadline: None,
				});
			}
			tasks[0].settlement.settle(Err(SendFailure::Timeout { after_ms: 1 }));
		}

		let task = next_pending(&queue).unwrap();
		assert_eq!(task.id, 2);
		assert_eq!(queue.len(), 1);
	}

	#[test]
	fn fail_all_settles_and_empties() {
		let queue = DeliveryQueue::default();
		let (settlement, mut rx) = Settlement::new();
		queue.tasks.lock().push_back(QueueTask {
			id: 1,
			recipient: "r".into(),
			body: "b".into(),
			enqueued_at: Instant::now(),
			settlement,
			deadline: None,
		});

		assert_eq!(queue.fail_all(SendFailure::ShuttingDown), 1);
		assert!(queue.is_empty());
		assert_eq!(rx.try_recv().unwrap(), Err(SendFailure::ShuttingDown));
	}
}
