//! Session driver backed by an automation bridge process.
//!
//! The bridge is any program that speaks the line protocol in
//! [`courier_protocol::bridge`] on stdin/stdout. It is started once per
//! session generation with `--profile <dir>` so persisted credentials
//! survive a restart.

mod connection;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_protocol::DeliveryReceipt;
use courier_protocol::bridge::{METHOD_DESTROY, METHOD_INITIALIZE, METHOD_PING, METHOD_SEND_MESSAGE};
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use connection::BridgeConnection;

use crate::config::BridgeConfig;
use crate::driver::{EventSink, Session, SessionDriver};
use crate::error::{Error, Result};

/// How long a `destroy` request may take before the process is killed.
const DESTROY_GRACE: Duration = Duration::from_secs(5);

/// Spawns one bridge process per session.
#[derive(Debug, Clone)]
pub struct BridgeDriver {
	config: BridgeConfig,
}

impl BridgeDriver {
	pub fn new(config: BridgeConfig) -> Self {
		Self { config }
	}
}

impl SessionDriver for BridgeDriver {
	fn create(&self, profile_dir: &Path, events: EventSink) -> Result<Arc<dyn Session>> {
		std::fs::create_dir_all(profile_dir).map_err(|e| {
			Error::LaunchFailed(format!("failed to create profile dir {}: {e}", profile_dir.display()))
		})?;

		let mut cmd = Command::new(&self.config.program);
		cmd.args(&self.config.args)
			.arg("--profile")
			.arg(profile_dir)
			.envs(&self.config.env)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("failed to spawn {}: {e}", self.config.program)))?;

		let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
			return Err(Error::LaunchFailed("bridge stdio was not piped".into()));
		};

		info!(
			target = "courier.bridge",
			generation = events.generation(),
			pid = child.id(),
			program = %self.config.program,
			"bridge process started"
		);

		Ok(Arc::new(BridgeSession {
			generation: events.generation(),
			connection: BridgeConnection::start(stdout, stdin, events),
			child: Mutex::new(child),
			initialize_timeout: self.config.initialize_timeout(),
		}))
	}
}

struct BridgeSession {
	generation: u64,
	connection: BridgeConnection,
	child: Mutex<Child>,
	initialize_timeout: Duration,
}

#[async_trait]
impl Session for BridgeSession {
	async fn initialize(&self) -> Result<()> {
		let request = self.connection.request(METHOD_INITIALIZE, json!({}));
		match tokio::time::timeout(self.initialize_timeout, request).await {
			Ok(result) => result.map(|_| ()),
			Err(_) => Err(Error::Timeout(format!(
				"bridge did not initialize within {}ms",
				self.initialize_timeout.as_millis()
			))),
		}
	}

	async fn is_live(&self) -> bool {
		if self.connection.is_closed() {
			return false;
		}
		match self.child.lock().await.try_wait() {
			Ok(None) => {}
			Ok(Some(status)) => {
				debug!(target = "courier.bridge", generation = self.generation, %status, "bridge process has exited");
				return false;
			}
			Err(_) => return false,
		}
		self.connection.request(METHOD_PING, Value::Null).await.is_ok()
	}

	async fn send_message(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt> {
		let result = self
			.connection
			.request(METHOD_SEND_MESSAGE, json!({ "recipient": recipient, "body": body }))
			.await?;
		Ok(serde_json::from_value(result)?)
	}

	async fn destroy(&self) -> Result<()> {
		if !self.connection.is_closed() {
			match tokio::time::timeout(DESTROY_GRACE, self.connection.request(METHOD_DESTROY, Value::Null)).await {
				Ok(Ok(_)) => {}
				Ok(Err(err)) => {
					debug!(target = "courier.bridge", generation = self.generation, error = %err, "bridge destroy request failed");
				}
				Err(_) => {
					warn!(target = "courier.bridge", generation = self.generation, "bridge ignored destroy, killing");
				}
			}
		}

		let mut child = self.child.lock().await;
		if let Ok(Some(_)) = child.try_wait() {
			return Ok(());
		}
		child.kill().await?;
		Ok(())
	}
}
