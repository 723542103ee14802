//! Request/response correlation over a newline-delimited JSON pipe.
//!
//! # Message Flow
//!
//! 1. `request()` allocates an id and parks a oneshot sender under it
//! 2. The request line goes to the writer task
//! 3. The reader task parses each incoming line
//! 4. Responses complete the parked sender with the same id
//! 5. Events are forwarded to the session's [`EventSink`]
//!
//! When the bridge's stdout closes, every parked request fails with
//! [`Error::TransportClosed`] and a `disconnected` event is emitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use courier_protocol::bridge::{BridgeEvent, BridgeMessage, BridgeRequest, BridgeResponse};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::driver::{EventSink, SessionEvent};
use crate::error::{Error, Result};

pub(crate) const EXIT_REASON: &str = "bridge process exited";

#[derive(Default)]
struct Inflight {
	closed: bool,
	waiting: HashMap<u32, oneshot::Sender<Result<Value>>>,
}

type InflightMap = Arc<Mutex<Inflight>>;

/// Removes a parked request if its future is dropped before the response arrives.
struct CancelGuard {
	id: u32,
	inflight: InflightMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.inflight.lock().waiting.remove(&self.id).is_some() {
			debug!(target = "courier.bridge", id = self.id, "dropped orphaned request");
		}
	}
}

pub struct BridgeConnection {
	last_id: AtomicU32,
	inflight: InflightMap,
	outbound: mpsc::UnboundedSender<String>,
}

impl BridgeConnection {
	/// Starts the reader and writer tasks. `reader` is the bridge's stdout, `writer` its stdin.
	pub fn start<R, W>(reader: R, writer: W, events: EventSink) -> Self
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let inflight: InflightMap = Arc::default();
		let (outbound, outbound_rx) = mpsc::unbounded_channel();

		tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&inflight)));
		tokio::spawn(read_loop(reader, events, Arc::clone(&inflight)));

		Self {
			last_id: AtomicU32::new(0),
			inflight,
			outbound,
		}
	}

	pub fn is_closed(&self) -> bool {
		self.inflight.lock().closed
	}

	/// Sends `method` and waits for its response.
	///
	/// A response carrying `error` becomes [`Error::Remote`] with the bridge's code.
	pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
		let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
		let line = serde_json::to_string(&BridgeRequest {
			id,
			method: method.to_string(),
			params,
		})?;

		let (tx, rx) = oneshot::channel();
		{
			let mut inflight = self.inflight.lock();
			if inflight.closed {
				return Err(Error::TransportClosed(EXIT_REASON.into()));
			}
			inflight.waiting.insert(id, tx);
		}
		let mut guard = CancelGuard {
			id,
			inflight: Arc::clone(&self.inflight),
			completed: false,
		};

		trace!(target = "courier.bridge", id, method, "request");
		if self.outbound.send(line).is_err() {
			return Err(Error::TransportClosed("bridge writer stopped".into()));
		}

		let result = rx.await;
		guard.completed = true;
		result.map_err(|_| Error::TransportClosed(EXIT_REASON.into()))?
	}
}

async fn write_loop<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>, inflight: InflightMap)
where
	W: AsyncWrite + Unpin,
{
	while let Some(mut line) = lines.recv().await {
		line.push('\n');
		let written = async {
			writer.write_all(line.as_bytes()).await?;
			writer.flush().await
		}
		.await;
		if let Err(err) = written {
			warn!(target = "courier.bridge", error = %err, "failed writing to bridge");
			fail_all(&inflight, "bridge stdin closed");
			break;
		}
	}
}

async fn read_loop<R>(reader: R, events: EventSink, inflight: InflightMap)
where
	R: AsyncRead + Unpin,
{
	let mut lines = BufReader::new(reader).lines();

	loop {
		match lines.next_line().await {
			Ok(Some(line)) => {
				let line = line.trim();
				if line.is_empty() {
					continue;
				}
				match serde_json::from_str::<BridgeMessage>(line) {
					Ok(message) => dispatch(message, &events, &inflight),
					Err(err) => warn!(target = "courier.bridge", error = %err, "unparseable bridge line"),
				}
			}
			Ok(None) => break,
			Err(err) => {
				warn!(target = "courier.bridge", error = %err, "failed reading from bridge");
				break;
			}
		}
	}

	debug!(target = "courier.bridge", generation = events.generation(), "bridge stdout closed");
	fail_all(&inflight, EXIT_REASON);
	events.emit(SessionEvent::Disconnected(EXIT_REASON.into()));
}

fn dispatch(message: BridgeMessage, events: &EventSink, inflight: &InflightMap) {
	match message {
		BridgeMessage::Response(BridgeResponse { id, result, error }) => {
			let Some(tx) = inflight.lock().waiting.remove(&id) else {
				debug!(target = "courier.bridge", id, "response for unknown request");
				return;
			};
			let outcome = match error {
				Some(err) => Err(Error::Remote {
					code: err.code,
					message: err.message,
				}),
				None => Ok(result.unwrap_or(Value::Null)),
			};
			let _ = tx.send(outcome);
		}
		BridgeMessage::Event(event) => {
			let event = match event {
				BridgeEvent::Qr { code } => SessionEvent::QrNeeded(code),
				BridgeEvent::Authenticated => SessionEvent::Authenticated,
				BridgeEvent::Ready => SessionEvent::Ready,
				BridgeEvent::AuthFailure { message } => SessionEvent::AuthFailed(message),
				BridgeEvent::Disconnected { reason } => SessionEvent::Disconnected(reason),
			};
			events.emit(event);
		}
		BridgeMessage::Unknown(value) => {
			trace!(target = "courier.bridge", %value, "ignoring unrecognized bridge line");
		}
	}
}

fn fail_all(inflight: &InflightMap, reason: &str) {
	let waiting = {
		let mut inflight = inflight.lock();
		inflight.closed = true;
		std::mem::take(&mut inflight.waiting)
	};
	for (_, tx) in waiting {
		let _ = tx.send(Err(Error::TransportClosed(reason.to_string())));
	}
}
