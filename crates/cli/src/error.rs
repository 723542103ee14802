use std::path::PathBuf;

use courier_protocol::FailureCode;
use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {}: {source}", .path.display())]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {}: {source}", .path.display())]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("gateway unreachable at {url}: {source}")]
	Unreachable {
		url: String,
		#[source]
		source: reqwest::Error,
	},

	/// Non-success response from the gateway. `code` is set when the body was a failure body.
	#[error("{message}")]
	Gateway {
		status: u16,
		code: Option<FailureCode>,
		message: String,
	},

	#[error(transparent)]
	Runtime(#[from] courier_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	pub fn to_command_error(&self) -> CommandError {
		let (code, details) = match self {
			CliError::ConfigRead { path, .. } | CliError::ConfigParse { path, .. } => {
				(ErrorCode::ConfigError, Some(serde_json::json!({ "path": path })))
			}
			CliError::Unreachable { url, .. } => (ErrorCode::GatewayUnreachable, Some(serde_json::json!({ "url": url }))),
			CliError::Gateway { status, code, .. } => (
				code.map(ErrorCode::from).unwrap_or(ErrorCode::GatewayError),
				Some(serde_json::json!({ "status": status })),
			),
			CliError::Runtime(courier_runtime::Error::Config(_)) => (ErrorCode::ConfigError, None),
			CliError::Runtime(_) => (ErrorCode::InternalError, None),
			CliError::Io(_) => (ErrorCode::IoError, None),
			CliError::Json(_) | CliError::Anyhow(_) => (ErrorCode::InternalError, None),
		};

		CommandError {
			code,
			message: self.to_string(),
			details,
		}
	}

	/// Process exit status: 2 for configuration problems, 3 when no gateway answered, 1 otherwise.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::ConfigRead { .. } | CliError::ConfigParse { .. } => 2,
			CliError::Runtime(courier_runtime::Error::Config(_)) => 2,
			CliError::Unreachable { .. } => 3,
			_ => 1,
		}
	}
}
