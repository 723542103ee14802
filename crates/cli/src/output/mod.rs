//! Result envelope printed by every client command.
//!
//! ## Output Contract
//!
//! ```json
//! { "ok": true, "command": "send", "data": { "deliveryId": "m-1", "timestamp": 1700000000000 } }
//! ```
//!
//! On failure:
//!
//! ```json
//! { "ok": false, "command": "send", "error": { "code": "SESSION_FATAL", "message": "..." } }
//! ```


use courier_protocol::FailureCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	pub ok: bool,

	/// Subcommand name (e.g. "send", "status")
	pub command: String,

	/// Only present on success
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	/// Only present on failure
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,

	/// HTTP status or other context
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Session is terminal and needs a restart
	NotReady,
	InvalidInput,
	/// Session died mid-send; the gateway is recovering
	SessionFatal,
	Timeout,
	DispatchFailed,
	ShuttingDown,
	/// No gateway answered at `--url`
	GatewayUnreachable,
	/// Gateway answered with something other than a known failure body
	GatewayError,
	ConfigError,
	IoError,
	InternalError,
}

impl From<FailureCode> for ErrorCode {
	fn from(code: FailureCode) -> Self {
		match code {
			FailureCode::NotReady => ErrorCode::NotReady,
			FailureCode::InvalidInput => ErrorCode::InvalidInput,
			FailureCode::SessionFatal => ErrorCode::SessionFatal,
			FailureCode::Timeout => ErrorCode::Timeout,
			FailureCode::DispatchFailed => ErrorCode::DispatchFailed,
			FailureCode::ShuttingDown => ErrorCode::ShuttingDown,
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			ErrorCode::NotReady => "NOT_READY",
			ErrorCode::InvalidInput => "INVALID_INPUT",
			ErrorCode::SessionFatal => "SESSION_FATAL",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::DispatchFailed => "DISPATCH_FAILED",
			ErrorCode::ShuttingDown => "SHUTTING_DOWN",
			ErrorCode::GatewayUnreachable => "GATEWAY_UNREACHABLE",
			ErrorCode::GatewayError => "GATEWAY_ERROR",
			ErrorCode::ConfigError => "CONFIG_ERROR",
			ErrorCode::IoError => "IO_ERROR",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		};
		f.write_str(name)
	}
}

pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn error_with_details(mut self, code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: Some(details),
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		CommandResult {
			ok,
			command: self.command,
			data: self.data,
			error: self.error,
		}
	}
}

/// Prints a result to stdout as pretty JSON.
pub fn print_result<T: Serialize>(result: &CommandResult<T>) {
	if let Ok(json) = serde_json::to_string_pretty(result) {
		println!("{json}");
	}
}

/// Human-readable error line for stderr.
pub fn print_error_stderr(error: &CommandError) {
	eprintln!("error [{}]: {}", error.code, error.message);
}
