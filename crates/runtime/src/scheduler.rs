//! Cancellable timers and background tasks.
//!
//! Every delayed action the supervisor takes (init retries, reconnects,
//! recovery, task deadlines, the drain loop) is spawned through a
//! [`Scheduler`], so shutdown can stop all of them with one
//! [`cancel_all`](Scheduler::cancel_all) instead of relying on process exit.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

pub struct Scheduler {
	next_id: AtomicU64,
	tasks: Mutex<HashMap<u64, AbortHandle>>,
	closed: AtomicBool,
}

/// Cancellation handle for one scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TimerHandle {
	id: u64,
	abort: AbortHandle,
	scheduler: Weak<Scheduler>,
}

impl TimerHandle {
	pub fn cancel(self) {
		self.abort.abort();
		if let Some(scheduler) = self.scheduler.upgrade() {
			scheduler.tasks.lock().remove(&self.id);
		}
	}
}

impl Scheduler {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			next_id: AtomicU64::new(1),
			tasks: Mutex::new(HashMap::new()),
			closed: AtomicBool::new(false),
		})
	}

	/// Runs `fut` after `delay`. Returns `None` once the scheduler is closed.
	pub fn schedule<F>(self: &Arc<Self>, label: &'static str, delay: Duration, fut: F) -> Option<TimerHandle>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		if self.closed.load(Ordering::Acquire) {
			trace!(target = "courier.scheduler", label, "scheduler closed, dropping task");
			return None;
		}

		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let weak = Arc::downgrade(self);

		// Hold the lock across spawn so the task cannot deregister before it is registered.
		let mut tasks = self.tasks.lock();
		let handle = tokio::spawn(async move {
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			fut.await;
			if let Some(scheduler) = weak.upgrade() {
				scheduler.tasks.lock().remove(&id);
			}
		});
		let abort = handle.abort_handle();
		tasks.insert(id, abort.clone());
		trace!(target = "courier.scheduler", label, id, delay_ms = delay.as_millis() as u64, "scheduled");

		Some(TimerHandle {
			id,
			abort,
			scheduler: Arc::downgrade(self),
		})
	}

	/// Runs `fut` immediately as a tracked task.
	pub fn spawn<F>(self: &Arc<Self>, label: &'static str, fut: F) -> Option<TimerHandle>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		self.schedule(label, Duration::ZERO, fut)
	}

	/// Closes the scheduler and aborts every outstanding task. Returns how many were aborted.
	pub fn cancel_all(&self) -> usize {
		self.closed.store(true, Ordering::Release);
		let drained: Vec<AbortHandle> = self.tasks.lock().drain().map(|(_, abort)| abort).collect();
		for abort in &drained {
			abort.abort();
		}
		drained.len()
	}

	pub fn pending(&self) -> usize {
		self.tasks.lock().len()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn scheduled_task_runs_after_delay_and_deregisters() {
		let scheduler = Scheduler::new();
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);

		scheduler
			.schedule("test", Duration::from_secs(5), async move {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();
		assert_eq!(scheduler.pending(), 1);

		tokio::time::sleep(Duration::from_secs(4)).await;
		assert_eq!(hits.load(Ordering::SeqCst), 0);

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert_eq!(scheduler.pending(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_prevents_execution() {
		let scheduler = Scheduler::new();
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);

		let handle = scheduler
			.schedule("test", Duration::from_secs(1), async move {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();
		handle.cancel();

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(hits.load(Ordering::SeqCst), 0);
		assert_eq!(scheduler.pending(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_all_closes_scheduler() {
		let scheduler = Scheduler::new();
		let hits = Arc::new(AtomicUsize::new(0));

		for _ in 0..3 {
			let counter = Arc::clone(&hits);
			scheduler.schedule("test", Duration::from_secs(1), async move {
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}

		assert_eq!(scheduler.cancel_all(), 3);
		assert!(scheduler.is_closed());
		assert!(scheduler.spawn("late", async {}).is_none());

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(hits.load(Ordering::SeqCst), 0);
	}
}
