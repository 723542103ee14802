//! Line protocol spoken with an automation bridge process.
//!
//! The gateway writes one [`BridgeRequest`] per line to the bridge's stdin and
//! reads one [`BridgeMessage`] per line from its stdout. Responses carry the
//! `id` of the request they answer; events carry an `event` discriminator and
//! no id.
//!
//! ```text
//! > {"id":1,"method":"initialize","params":{}}
//! < {"event":"qr","code":"2@abc..."}
//! < {"event":"ready"}
//! < {"id":1,"result":null}
//! > {"id":2,"method":"sendMessage","params":{"recipient":"123","body":"hi"}}
//! < {"id":2,"result":{"deliveryId":"m-1","timestamp":1700000000000}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SEND_MESSAGE: &str = "sendMessage";
pub const METHOD_PING: &str = "ping";
pub const METHOD_DESTROY: &str = "destroy";

/// Request written to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
	pub id: u32,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Error payload of a failed bridge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeError {
	/// Machine-readable class, e.g. `session_closed` or `evaluation_noise`.
	pub code: String,
	pub message: String,
}

/// Response to a [`BridgeRequest`]; `result` and `error` are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
	pub id: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<BridgeError>,
}

/// Lifecycle event pushed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BridgeEvent {
	/// A credential-exchange code the operator must scan.
	Qr { code: String },
	Authenticated,
	Ready,
	AuthFailure {
		#[serde(default)]
		message: String,
	},
	Disconnected {
		#[serde(default)]
		reason: String,
	},
}

/// Any line the bridge may write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeMessage {
	/// Has an `id` field.
	Response(BridgeResponse),
	/// Has an `event` field.
	Event(BridgeEvent),
	/// Forward-compatible catch-all.
	Unknown(Value),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_error_response() {
		let line = r#"{"id":7,"error":{"code":"session_closed","message":"Protocol error: Target closed"}}"#;
		let msg: BridgeMessage = serde_json::from_str(line).unwrap();
		match msg {
			BridgeMessage::Response(resp) => {
				assert_eq!(resp.id, 7);
				assert!(resp.result.is_none());
				assert_eq!(resp.error.unwrap().code, "session_closed");
			}
			other => panic!("expected response, got {other:?}"),
		}
	}

	#[test]
	fn parses_lifecycle_events() {
		let qr: BridgeMessage = serde_json::from_str(r#"{"event":"qr","code":"2@xyz"}"#).unwrap();
		assert_eq!(qr, BridgeMessage::Event(BridgeEvent::Qr { code: "2@xyz".into() }));

		let gone: BridgeMessage =
			serde_json::from_str(r#"{"event":"disconnected","reason":"NAVIGATION"}"#).unwrap();
		assert_eq!(
			gone,
			BridgeMessage::Event(BridgeEvent::Disconnected {
				reason: "NAVIGATION".into()
			})
		);

		let failed: BridgeMessage = serde_json::from_str(r#"{"event":"authFailure"}"#).unwrap();
		assert_eq!(
			failed,
			BridgeMessage::Event(BridgeEvent::AuthFailure {
				message: String::new()
			})
		);
	}

	#[test]
	fn unrecognized_lines_fall_through() {
		let msg: BridgeMessage = serde_json::from_str(r#"{"log":"loading chats"}"#).unwrap();
		assert!(matches!(msg, BridgeMessage::Unknown(_)));
	}

	#[test]
	fn request_format() {
		let req = BridgeRequest {
			id: 2,
			method: METHOD_SEND_MESSAGE.to_string(),
			params: serde_json::json!({"recipient": "123", "body": "hi"}),
		};
		let value = serde_json::to_value(&req).unwrap();
		assert_eq!(value["id"], 2);
		assert_eq!(value["method"], "sendMessage");
		assert_eq!(value["params"]["recipient"], "123");
	}
}
