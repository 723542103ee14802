// Session lifecycle, health checks and recovery through the public supervisor API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{start, wait_for_state, yield_tasks};
use courier_protocol::SessionState;
use courier_runtime::testing::{DestroyStep, FakeDriver, InitStep, LivenessStep};
use parking_lot::Mutex;
use tokio::time::Instant;
use courier_runtime::{CheckOutcome, OperatorNotice, SendFailure, SessionEvent};

#[tokio::test(start_paused = true)]
async fn first_session_becomes_ready() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	let snapshot = supervisor.health_snapshot().await;
	assert!(snapshot.is_live);
	assert_eq!(snapshot.generation, 1);
	assert_eq!(snapshot.init_attempts, 0);
	assert!(!snapshot.terminal);
	assert!(!snapshot.recovery_in_flight);
	assert!(snapshot.last_health_check_at.is_none());
	assert_eq!(supervisor.config().max_init_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn health_checks_run_on_the_interval() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	tokio::time::sleep(Duration::from_secs(31)).await;
	let snapshot = supervisor.health_snapshot().await;
	assert!(snapshot.last_health_check_at.is_some());
	assert_eq!(snapshot.state, SessionState::Ready);
	assert_eq!(snapshot.recoveries, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_failed_checks_start_one_recovery() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	driver.set_dead(true);
	let (a, b) = tokio::join!(supervisor.check_health(), supervisor.check_health());
	let requested = [a, b]
		.iter()
		.filter(|outcome| **outcome == CheckOutcome::Unhealthy { recovery_requested: true })
		.count();
	assert_eq!(requested, 1);
	assert_eq!(supervisor.state(), SessionState::Recovering);
	assert!(!supervisor.request_manual_recovery().accepted);

	driver.set_dead(false);
	wait_for_state(&supervisor, SessionState::Ready).await;

	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.recoveries, 1);
	assert_eq!(snapshot.generation, 2);
	assert_eq!(driver.creates(), 2);
	assert_eq!(driver.destroys(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_check_requests_recovery() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;
	let mut notices = supervisor.subscribe_notices();

	driver.set_dead(true);
	let outcome = supervisor.check_health().await;
	assert_eq!(outcome, CheckOutcome::Unhealthy { recovery_requested: true });
	assert!(supervisor.health_snapshot().await.recovery_in_flight);

	driver.set_dead(false);
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert!(!supervisor.health_snapshot().await.recovery_in_flight);
	assert!(notices.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn manual_recovery_replaces_the_session() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	assert!(supervisor.request_manual_recovery().accepted);
	// Marked before the request returns.
	assert_eq!(supervisor.state(), SessionState::Recovering);
	assert!(!supervisor.request_manual_recovery().accepted);

	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(supervisor.health_snapshot().await.generation, 2);
	assert!(supervisor.request_manual_recovery().accepted);
}

#[tokio::test(start_paused = true)]
async fn init_failures_exhaust_then_restart_rearms() {
	let driver = FakeDriver::new();
	for _ in 0..3 {
		driver.push_init(InitStep::Fail("browser crashed".into()));
	}
	let supervisor = start(&driver);
	let mut notices = supervisor.subscribe_notices();

	// Retries after 5s and 10s; the third failure is terminal.
	tokio::time::sleep(Duration::from_secs(16)).await;
	assert_eq!(driver.creates(), 3);
	assert_eq!(notices.recv().await.unwrap(), OperatorNotice::AttemptsExhausted { attempts: 3 });

	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.state, SessionState::Disconnected);
	assert!(snapshot.terminal);
	assert_eq!(snapshot.init_attempts, 3);

	// Health checks keep failing but never re-arm a terminal session.
	tokio::time::sleep(Duration::from_secs(120)).await;
	assert_eq!(driver.creates(), 3);
	assert_eq!(supervisor.health_snapshot().await.recoveries, 0);
	assert!(matches!(
		supervisor.enqueue_send("100", "hi").await,
		Err(SendFailure::NotReady(_))
	));

	supervisor.request_full_restart().unwrap();
	wait_for_state(&supervisor, SessionState::Ready).await;
	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.init_attempts, 0);
	assert!(!snapshot.terminal);
	assert_eq!(driver.creates(), 4);
}

#[tokio::test(start_paused = true)]
async fn create_failure_is_retried_with_backoff() {
	let driver = FakeDriver::new();
	driver.push_init(InitStep::CreateFail("spawn failed".into()));
	let supervisor = start(&driver);

	yield_tasks().await;
	assert_eq!(supervisor.state(), SessionState::Disconnected);
	assert_eq!(driver.creates(), 1);

	tokio::time::sleep(Duration::from_secs(4)).await;
	assert_eq!(driver.creates(), 1);

	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(driver.creates(), 2);
	// The failed create never produced a session to initialize.
	assert_eq!(driver.initializes(), 1);
	assert_eq!(supervisor.health_snapshot().await.generation, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_checks_wait_for_a_pending_init_retry() {
	let driver = FakeDriver::new();
	driver.push_init(InitStep::Fail("browser crashed".into()));
	let supervisor = start(&driver);
	yield_tasks().await;
	assert_eq!(supervisor.state(), SessionState::Disconnected);

	tokio::time::sleep(Duration::from_secs(2)).await;
	assert_eq!(
		supervisor.check_health().await,
		CheckOutcome::Unhealthy { recovery_requested: false }
	);
	assert_eq!(supervisor.health_snapshot().await.recoveries, 0);
	assert_eq!(driver.creates(), 1);

	// The backoff retry, not a recovery, brings it back.
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(driver.creates(), 2);
	assert_eq!(supervisor.health_snapshot().await.recoveries, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_checks_wait_for_a_pending_reconnect() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	driver.emit(SessionEvent::Disconnected("CONFLICT".into()));
	yield_tasks().await;
	assert_eq!(
		supervisor.check_health().await,
		CheckOutcome::Unhealthy { recovery_requested: false }
	);
	assert_eq!(supervisor.health_snapshot().await.recoveries, 0);
	assert_eq!(supervisor.state(), SessionState::Disconnected);

	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(supervisor.health_snapshot().await.recoveries, 1);
	assert_eq!(driver.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_is_dropped_when_the_session_comes_back() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	driver.emit(SessionEvent::Disconnected("TIMEOUT".into()));
	yield_tasks().await;
	assert_eq!(supervisor.state(), SessionState::Disconnected);

	driver.emit(SessionEvent::Ready);
	yield_tasks().await;
	assert_eq!(supervisor.state(), SessionState::Ready);

	tokio::time::sleep(Duration::from_secs(11)).await;
	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.state, SessionState::Ready);
	assert_eq!(snapshot.recoveries, 0);
	assert_eq!(snapshot.generation, 1);
	assert_eq!(driver.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_teardown_does_not_block_recovery() {
	let driver = FakeDriver::new();
	driver.push_destroy(DestroyStep::Fail("page already closed".into()));
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	assert!(supervisor.request_manual_recovery().accepted);
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(supervisor.health_snapshot().await.generation, 2);
	assert_eq!(driver.destroys(), 1);
	assert_eq!(driver.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_teardown_does_not_block_recovery() {
	let driver = FakeDriver::new();
	driver.push_destroy(DestroyStep::Panic);
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	assert!(supervisor.request_manual_recovery().accepted);
	wait_for_state(&supervisor, SessionState::Ready).await;
	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.generation, 2);
	assert!(!snapshot.recovery_in_flight);
}

#[tokio::test(start_paused = true)]
async fn hung_teardown_is_abandoned_after_its_timeout() {
	let driver = FakeDriver::new();
	driver.push_destroy(DestroyStep::Hang);
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	let started = Instant::now();
	assert!(supervisor.request_manual_recovery().accepted);

	// 15s teardown timeout, then 3s settle before the fresh create.
	tokio::time::sleep(Duration::from_secs(17)).await;
	assert_eq!(supervisor.state(), SessionState::Recovering);
	assert_eq!(driver.creates(), 1);

	wait_for_state(&supervisor, SessionState::Ready).await;
	assert!(started.elapsed() >= Duration::from_secs(18));
	assert_eq!(supervisor.health_snapshot().await.generation, 2);
	assert_eq!(driver.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_liveness_check_counts_as_dead() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	driver.push_liveness(LivenessStep::Hang);
	let started = Instant::now();
	let outcome = supervisor.check_health().await;
	assert!(started.elapsed() >= Duration::from_secs(10));
	assert_eq!(outcome, CheckOutcome::Unhealthy { recovery_requested: true });

	wait_for_state(&supervisor, SessionState::Ready).await;
	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.recoveries, 1);
	assert_eq!(snapshot.generation, 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_liveness_check_counts_as_dead() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	driver.push_liveness(LivenessStep::Panic);
	assert_eq!(
		supervisor.check_health().await,
		CheckOutcome::Unhealthy { recovery_requested: true }
	);
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(supervisor.health_snapshot().await.recoveries, 1);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_stays_readable_while_the_driver_creates() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	let seen = Arc::new(Mutex::new(Vec::new()));
	let observer = supervisor.clone();
	let record = Arc::clone(&seen);
	driver.on_create(move || record.lock().push(observer.state()));

	assert!(supervisor.request_manual_recovery().accepted);
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(*seen.lock(), vec![SessionState::Initializing]);
	assert_eq!(supervisor.health_snapshot().await.generation, 2);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_is_terminal_until_restart() {
	let driver = FakeDriver::new();
	driver.push_init(InitStep::AuthFail("credentials revoked".into()));
	let supervisor = start(&driver);
	let mut notices = supervisor.subscribe_notices();

	assert_eq!(
		notices.recv().await.unwrap(),
		OperatorNotice::AuthFailed {
			generation: 1,
			message: "credentials revoked".into()
		}
	);
	assert_eq!(supervisor.state(), SessionState::Disconnected);

	tokio::time::sleep(Duration::from_secs(90)).await;
	assert_eq!(driver.creates(), 1);
	assert!(supervisor.health_snapshot().await.terminal);

	supervisor.request_full_restart().unwrap();
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(driver.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn qr_code_reaches_the_operator() {
	let driver = FakeDriver::new();
	driver.push_init(InitStep::Qr("2@scan-me".into()));
	let supervisor = start(&driver);
	let mut notices = supervisor.subscribe_notices();

	assert_eq!(
		notices.recv().await.unwrap(),
		OperatorNotice::Qr {
			generation: 1,
			code: "2@scan-me".into()
		}
	);
	assert_eq!(supervisor.state(), SessionState::Initializing);
}

#[tokio::test(start_paused = true)]
async fn disconnect_reconnects_through_recovery() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	driver.emit(SessionEvent::Disconnected("NAVIGATION".into()));
	yield_tasks().await;
	assert_eq!(supervisor.state(), SessionState::Disconnected);

	// A second disconnect does not schedule a second reconnect.
	driver.emit(SessionEvent::Disconnected("NAVIGATION".into()));
	tokio::time::sleep(Duration::from_secs(9)).await;
	assert_eq!(driver.creates(), 1);

	wait_for_state(&supervisor, SessionState::Ready).await;
	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.recoveries, 1);
	assert_eq!(snapshot.generation, 2);
	assert_eq!(driver.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_session_are_ignored() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;
	let stale = driver.latest_sink().unwrap();

	assert!(supervisor.request_manual_recovery().accepted);
	wait_for_state(&supervisor, SessionState::Ready).await;
	assert_eq!(supervisor.health_snapshot().await.generation, 2);

	stale.emit(SessionEvent::Disconnected("late".into()));
	stale.emit(SessionEvent::AuthFailed("late".into()));
	tokio::time::sleep(Duration::from_secs(1)).await;

	let snapshot = supervisor.health_snapshot().await;
	assert_eq!(snapshot.state, SessionState::Ready);
	assert!(!snapshot.terminal);
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent_and_stops_timers() {
	let driver = FakeDriver::new();
	let supervisor = start(&driver);
	wait_for_state(&supervisor, SessionState::Ready).await;

	supervisor.shutdown().await;
	supervisor.shutdown().await;
	assert!(supervisor.is_shutting_down());
	assert_eq!(driver.destroys(), 1);

	driver.set_dead(true);
	tokio::time::sleep(Duration::from_secs(120)).await;
	assert_eq!(driver.creates(), 1);
	assert_eq!(supervisor.check_health().await, CheckOutcome::Skipped);
}
