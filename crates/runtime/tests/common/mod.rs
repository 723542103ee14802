//! Shared helpers for supervisor integration tests.
//!
//! All tests run on a paused clock, so sleeping advances virtual time
//! instantly once every task is idle.

#![allow(dead_code)]

use std::time::Duration;

use courier_protocol::SessionState;
use courier_runtime::testing::FakeDriver;
use courier_runtime::{Supervisor, SupervisorConfig};

pub fn config() -> SupervisorConfig {
	SupervisorConfig {
		profile_dir: "unused-by-fake".into(),
		..Default::default()
	}
}

pub fn start(driver: &FakeDriver) -> Supervisor {
	start_with(driver, config())
}

pub fn start_with(driver: &FakeDriver, config: SupervisorConfig) -> Supervisor {
	Supervisor::start(config, driver.clone().into_driver()).expect("supervisor starts")
}

/// Lets spawned tasks run without moving the clock meaningfully.
pub async fn yield_tasks() {
	tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Polls until the supervisor reports `state`, failing after a minute of virtual time.
pub async fn wait_for_state(supervisor: &Supervisor, state: SessionState) {
	for _ in 0..6_000 {
		if supervisor.state() == state {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("supervisor never reached {state}, stuck in {}", supervisor.state());
}
