//! HTTP facade over a [`Supervisor`].
//!
//! | route                   | success                 | failure                      |
//! |-------------------------|-------------------------|------------------------------|
//! | `GET /health`           | 200 snapshot            |                              |
//! | `POST /messages`        | 200 receipt             | 400 / 502 / 503 / 504        |
//! | `POST /session/recover` | 202 `{accepted:true}`   | 409 `{accepted:false}`       |
//! | `POST /session/restart` | 202 `{restarted:true}`  | 503 while shutting down      |
//! | `DELETE /queue`         | 200 `{clearedCount}`    |                              |


use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use courier_protocol::{FailureBody, FailureCode, HealthSnapshot, RecoveryAck, RestartAck, SendRequest};
use courier_runtime::{BridgeDriver, OperatorNotice, Supervisor};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::GatewayConfig;

pub fn router(supervisor: Supervisor) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/messages", post(send_message))
		.route("/session/recover", post(recover))
		.route("/session/restart", post(restart))
		.route("/queue", delete(clear_queue))
		.with_state(supervisor)
}

/// HTTP status for a structured send failure.
pub fn status_for(code: FailureCode) -> StatusCode {
	match code {
		FailureCode::InvalidInput => StatusCode::BAD_REQUEST,
		FailureCode::NotReady | FailureCode::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
		FailureCode::SessionFatal | FailureCode::DispatchFailed => StatusCode::BAD_GATEWAY,
		FailureCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
	}
}

fn failure(code: FailureCode, message: impl Into<String>) -> Response {
	(status_for(code), Json(FailureBody::new(code, message))).into_response()
}

async fn health(State(supervisor): State<Supervisor>) -> Json<HealthSnapshot> {
	Json(supervisor.health_snapshot().await)
}

async fn send_message(
	State(supervisor): State<Supervisor>,
	request: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
	let Json(request) = match request {
		Ok(request) => request,
		Err(rejection) => return failure(FailureCode::InvalidInput, rejection.body_text()),
	};

	match supervisor.enqueue_send(&request.recipient, &request.body).await {
		Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
		Err(err) => failure(err.code(), err.to_string()),
	}
}

async fn recover(State(supervisor): State<Supervisor>) -> (StatusCode, Json<RecoveryAck>) {
	let ack = supervisor.request_manual_recovery();
	let status = if ack.accepted { StatusCode::ACCEPTED } else { StatusCode::CONFLICT };
	(status, Json(ack))
}

async fn restart(State(supervisor): State<Supervisor>) -> Response {
	match supervisor.request_full_restart() {
		Ok(()) => (StatusCode::ACCEPTED, Json(RestartAck { restarted: true })).into_response(),
		Err(err) => failure(FailureCode::ShuttingDown, err.to_string()),
	}
}

async fn clear_queue(State(supervisor): State<Supervisor>) -> impl IntoResponse {
	Json(supervisor.clear_queue())
}

/// Runs the gateway until SIGINT/SIGTERM, then shuts the supervisor down.
pub async fn serve(config: GatewayConfig) -> Result<()> {
	let addr = config.listen.addr()?;
	let driver = Arc::new(BridgeDriver::new(config.bridge.clone()));
	let supervisor = Supervisor::start(config.supervisor, driver).context("Failed to start supervisor")?;

	tokio::spawn(relay_notices(supervisor.subscribe_notices()));

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind gateway to {addr}"))?;
	info!(
		target = "courier.gateway",
		%addr,
		profile_dir = %supervisor.config().profile_dir.display(),
		"gateway listening"
	);

	let served = axum::serve(listener, router(supervisor.clone()))
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("Gateway server error");

	supervisor.shutdown().await;
	info!(target = "courier.gateway", "gateway stopped");
	served
}

/// Surfaces operator notices on stderr until the supervisor goes away.
async fn relay_notices(mut notices: broadcast::Receiver<OperatorNotice>) {
	loop {
		match notices.recv().await {
			Ok(OperatorNotice::Qr { generation, code }) => {
				warn!(target = "courier.gateway", generation, "session needs a QR scan");
				eprintln!("scan to link session {generation}:\n{code}");
			}
			Ok(OperatorNotice::AuthFailed { generation, message }) => {
				warn!(
					target = "courier.gateway",
					generation,
					%message,
					"authentication failed, run `courier restart` after fixing credentials"
				);
			}
			Ok(OperatorNotice::AttemptsExhausted { attempts }) => {
				warn!(
					target = "courier.gateway",
					attempts,
					"session initialization gave up, run `courier restart` to try again"
				);
			}
			Err(broadcast::error::RecvError::Lagged(skipped)) => {
				warn!(target = "courier.gateway", skipped, "operator notices dropped");
			}
			Err(broadcast::error::RecvError::Closed) => break,
		}
	}
}

#[cfg(unix)]
async fn shutdown_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
		(Ok(term), Ok(int)) => (term, int),
		_ => {
			warn!(target = "courier.gateway", "failed to install signal handlers, falling back to ctrl-c");
			let _ = tokio::signal::ctrl_c().await;
			return;
		}
	};

	tokio::select! {
		_ = sigterm.recv() => info!(target = "courier.gateway", "received SIGTERM, shutting down"),
		_ = sigint.recv() => info!(target = "courier.gateway", "received SIGINT, shutting down"),
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!(target = "courier.gateway", "received ctrl-c, shutting down");
}
