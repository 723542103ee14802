//! In-memory session driver for tests.
//!
//! [`FakeDriver`] plays back scripted initialization and send outcomes and
//! records what the supervisor asked of it, so lifecycle and queue behaviour
//! can be tested without a bridge process.
//!
//! # Example
//!
//! ```ignore
//! use courier_runtime::testing::{DestroyStep, FakeDriver, InitStep, SendStep};
//!
//! let driver = FakeDriver::new();
//! driver.push_init(InitStep::Fail("no browser".into()));
//! driver.push_send(SendStep::remote("session_closed"));
//! driver.push_destroy(DestroyStep::Hang);
//! let supervisor = Supervisor::start(config, driver.clone().into_driver())?;
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_protocol::DeliveryReceipt;
use parking_lot::Mutex;

use crate::driver::{EventSink, Session, SessionDriver, SessionEvent};
use crate::error::{Error, Result};

/// How the next session's startup goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStep {
	/// `initialize` emits `authenticated` then `ready`.
	Ready,
	/// `initialize` returns an error.
	Fail(String),
	/// `create` itself returns an error.
	CreateFail(String),
	/// `initialize` never completes and emits nothing.
	Hang,
	/// `initialize` emits `auth-failed`.
	AuthFail(String),
	/// `initialize` emits `qr-needed` and waits for a scripted event.
	Qr(String),
}

/// How the next `send_message` goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
	Ok,
	/// Fails with a structured remote error code.
	Remote { code: String, message: String },
	/// Fails as if the bridge pipe closed.
	TransportClosed,
	/// Succeeds after `Duration`.
	Delay(Duration),
}

impl SendStep {
	pub fn remote(code: &str) -> Self {
		SendStep::Remote {
			code: code.into(),
			message: format!("scripted {code}"),
		}
	}
}

/// How the next `destroy` goes. Unscripted teardowns succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyStep {
	Ok,
	/// Returns an error after marking the session destroyed.
	Fail(String),
	/// Never completes.
	Hang,
	/// Panics inside the driver.
	Panic,
}

/// How the next `is_live` goes. Unscripted checks answer from the session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStep {
	Live,
	Dead,
	/// Never answers.
	Hang,
	/// Panics inside the driver.
	Panic,
}

type CreateHook = Box<dyn Fn() + Send + Sync>;

/// One recorded `send_message` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
	pub generation: u64,
	pub recipient: String,
	pub body: String,
}

#[derive(Default)]
struct FakeState {
	init_plan: Mutex<VecDeque<InitStep>>,
	send_plan: Mutex<VecDeque<SendStep>>,
	destroy_plan: Mutex<VecDeque<DestroyStep>>,
	liveness_plan: Mutex<VecDeque<LivenessStep>>,
	on_create: Mutex<Option<CreateHook>>,
	sends: Mutex<Vec<SentMessage>>,
	sink: Mutex<Option<EventSink>>,
	creates: AtomicUsize,
	initializes: AtomicUsize,
	destroys: AtomicUsize,
	dead: AtomicBool,
	deliveries: AtomicU64,
}

/// Scriptable [`SessionDriver`]. Clones share the same script and records.
#[derive(Clone, Default)]
pub struct FakeDriver {
	state: Arc<FakeState>,
}

impl FakeDriver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn into_driver(self) -> Arc<dyn SessionDriver> {
		Arc::new(self)
	}

	/// Queues the startup outcome of a future session. Unscripted sessions become ready.
	pub fn push_init(&self, step: InitStep) {
		self.state.init_plan.lock().push_back(step);
	}

	/// Queues the outcome of a future send. Unscripted sends succeed.
	pub fn push_send(&self, step: SendStep) {
		self.state.send_plan.lock().push_back(step);
	}

	/// Queues the outcome of a future teardown.
	pub fn push_destroy(&self, step: DestroyStep) {
		self.state.destroy_plan.lock().push_back(step);
	}

	/// Queues the answer of a future `is_live` call. Health checks and
	/// snapshots both consume these.
	pub fn push_liveness(&self, step: LivenessStep) {
		self.state.liveness_plan.lock().push_back(step);
	}

	/// Runs `hook` at the start of every `create`, on the caller's thread.
	pub fn on_create(&self, hook: impl Fn() + Send + Sync + 'static) {
		*self.state.on_create.lock() = Some(Box::new(hook));
	}

	/// Makes `is_live` report false for every session until set back.
	pub fn set_dead(&self, dead: bool) {
		self.state.dead.store(dead, Ordering::SeqCst);
	}

	/// Emits `event` on behalf of the most recently created session.
	pub fn emit(&self, event: SessionEvent) -> bool {
		match &*self.state.sink.lock() {
			Some(sink) => sink.emit(event),
			None => false,
		}
	}

	/// Sink of the most recently created session.
	pub fn latest_sink(&self) -> Option<EventSink> {
		self.state.sink.lock().clone()
	}

	pub fn sends(&self) -> Vec<SentMessage> {
		self.state.sends.lock().clone()
	}

	pub fn sent_bodies(&self) -> Vec<String> {
		self.state.sends.lock().iter().map(|s| s.body.clone()).collect()
	}

	pub fn creates(&self) -> usize {
		self.state.creates.load(Ordering::SeqCst)
	}

	pub fn initializes(&self) -> usize {
		self.state.initializes.load(Ordering::SeqCst)
	}

	pub fn destroys(&self) -> usize {
		self.state.destroys.load(Ordering::SeqCst)
	}
}

impl SessionDriver for FakeDriver {
	fn create(&self, _profile_dir: &Path, events: EventSink) -> Result<Arc<dyn Session>> {
		self.state.creates.fetch_add(1, Ordering::SeqCst);
		if let Some(hook) = &*self.state.on_create.lock() {
			hook();
		}
		let step = self.state.init_plan.lock().pop_front().unwrap_or(InitStep::Ready);
		if let InitStep::CreateFail(message) = step {
			return Err(Error::LaunchFailed(message));
		}

		*self.state.sink.lock() = Some(events.clone());
		Ok(Arc::new(FakeSession {
			state: Arc::clone(&self.state),
			step: Mutex::new(Some(step)),
			events,
			destroyed: AtomicBool::new(false),
		}))
	}
}

struct FakeSession {
	state: Arc<FakeState>,
	step: Mutex<Option<InitStep>>,
	events: EventSink,
	destroyed: AtomicBool,
}

#[async_trait]
impl Session for FakeSession {
	async fn initialize(&self) -> Result<()> {
		self.state.initializes.fetch_add(1, Ordering::SeqCst);
		let step = self.step.lock().take().unwrap_or(InitStep::Ready);
		match step {
			InitStep::Ready => {
				self.events.emit(SessionEvent::Authenticated);
				self.events.emit(SessionEvent::Ready);
				Ok(())
			}
			InitStep::Fail(message) => Err(Error::InitFailed(message)),
			InitStep::CreateFail(message) => Err(Error::LaunchFailed(message)),
			InitStep::Hang => std::future::pending::<Result<()>>().await,
			InitStep::AuthFail(message) => {
				self.events.emit(SessionEvent::AuthFailed(message));
				Ok(())
			}
			InitStep::Qr(code) => {
				self.events.emit(SessionEvent::QrNeeded(code));
				Ok(())
			}
		}
	}

	async fn is_live(&self) -> bool {
		let step = self.state.liveness_plan.lock().pop_front();
		match step {
			Some(LivenessStep::Live) => return true,
			Some(LivenessStep::Dead) => return false,
			Some(LivenessStep::Hang) => std::future::pending::<()>().await,
			Some(LivenessStep::Panic) => panic!("scripted liveness panic"),
			None => {}
		}
		!self.destroyed.load(Ordering::SeqCst) && !self.state.dead.load(Ordering::SeqCst)
	}

	async fn send_message(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt> {
		self.state.sends.lock().push(SentMessage {
			generation: self.events.generation(),
			recipient: recipient.to_owned(),
			body: body.to_owned(),
		});

		let step = self.state.send_plan.lock().pop_front().unwrap_or(SendStep::Ok);
		match step {
			SendStep::Ok => {}
			SendStep::Remote { code, message } => return Err(Error::Remote { code, message }),
			SendStep::TransportClosed => {
				return Err(Error::TransportClosed("scripted pipe closure".into()));
			}
			SendStep::Delay(delay) => tokio::time::sleep(delay).await,
		}

		let n = self.state.deliveries.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(DeliveryReceipt {
			delivery_id: format!("fake-{n}"),
			timestamp: crate::now_ms(),
		})
	}

	async fn destroy(&self) -> Result<()> {
		self.destroyed.store(true, Ordering::SeqCst);
		self.state.destroys.fetch_add(1, Ordering::SeqCst);
		let step = self.state.destroy_plan.lock().pop_front().unwrap_or(DestroyStep::Ok);
		match step {
			DestroyStep::Ok => Ok(()),
			DestroyStep::Fail(message) => Err(Error::Protocol(message)),
			DestroyStep::Hang => std::future::pending().await,
			DestroyStep::Panic => panic!("scripted teardown panic"),
		}
	}
}
