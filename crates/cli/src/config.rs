//! Gateway config file.
//!
//! Looked up at `--config <FILE>` or `<config dir>/courier/config.json`.
//! A missing default file means "all defaults"; a missing explicit file is
//! an error. `serve` flags override whatever the file says.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use courier_runtime::{BridgeConfig, SupervisorConfig};
use serde::{Deserialize, Serialize};

use crate::cli::ServeArgs;
use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
	pub listen: ListenConfig,
	pub supervisor: SupervisorConfig,
	pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenConfig {
	pub host: String,
	pub port: u16,
}

impl Default for ListenConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			port: 3000,
		}
	}
}

impl ListenConfig {
	pub fn addr(&self) -> anyhow::Result<SocketAddr> {
		format!("{}:{}", self.host, self.port)
			.parse()
			.with_context(|| format!("Invalid host/port combination: {}:{}", self.host, self.port))
	}
}

impl GatewayConfig {
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("courier").join("config.json"))
	}

	/// Loads `explicit`, or the default path when it exists, or defaults.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::from_file(path);
		}
		match Self::default_path() {
			Some(path) if path.is_file() => Self::from_file(&path),
			_ => Ok(Self::default()),
		}
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&raw).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn apply_overrides(&mut self, args: &ServeArgs) {
		if let Some(host) = &args.host {
			self.listen.host.clone_from(host);
		}
		if let Some(port) = args.port {
			self.listen.port = port;
		}
		if let Some(dir) = &args.profile_dir {
			self.supervisor.profile_dir.clone_from(dir);
		}
		if let Some(program) = &args.bridge_program {
			self.bridge.program.clone_from(program);
		}
		if !args.bridge_args.is_empty() {
			self.bridge.args.clone_from(&args.bridge_args);
		}
	}

	pub fn validate(&self) -> Result<()> {
		self.supervisor.validate()?;
		if self.bridge.program.trim().is_empty() {
			return Err(courier_runtime::Error::Config("bridge.program must not be empty".into()).into());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	fn write_config(contents: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	#[test]
	fn partial_file_keeps_defaults() {
		let file = write_config(
			r#"{
				"listen": { "port": 8080 },
				"supervisor": { "taskTimeoutMs": 5000, "errors": { "benignErrorCodes": ["noise"] } },
				"bridge": { "program": "/opt/bridge/run" }
			}"#,
		);

		let config = GatewayConfig::from_file(file.path()).unwrap();
		assert_eq!(config.listen.host, "127.0.0.1");
		assert_eq!(config.listen.port, 8080);
		assert_eq!(config.supervisor.task_timeout_ms, 5_000);
		assert_eq!(config.supervisor.max_init_attempts, 3);
		assert_eq!(config.supervisor.errors.benign_error_codes, vec!["noise"]);
		assert_eq!(config.supervisor.errors.fatal_error_codes, vec!["session_closed", "target_closed"]);
		assert_eq!(config.bridge.program, "/opt/bridge/run");
		assert_eq!(config.bridge.args, vec!["bridge.js"]);
	}

	#[test]
	fn explicit_missing_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let err = GatewayConfig::load(Some(&dir.path().join("nope.json"))).unwrap_err();
		assert!(matches!(err, CliError::ConfigRead { .. }));
	}

	#[test]
	fn malformed_file_is_a_parse_error() {
		let file = write_config(r#"{ "listen": { "port": "eighty" } }"#);
		let err = GatewayConfig::from_file(file.path()).unwrap_err();
		assert!(matches!(err, CliError::ConfigParse { .. }));
	}

	#[test]
	fn flags_override_file() {
		let mut config = GatewayConfig::default();
		config.apply_overrides(&ServeArgs {
			host: Some("0.0.0.0".into()),
			port: Some(9000),
			profile_dir: Some("/data/profile".into()),
			bridge_program: None,
			bridge_args: vec!["--headless".into()],
		});

		assert_eq!(config.listen.addr().unwrap().to_string(), "0.0.0.0:9000");
		assert_eq!(config.supervisor.profile_dir, PathBuf::from("/data/profile"));
		assert_eq!(config.bridge.program, "node");
		assert_eq!(config.bridge.args, vec!["--headless"]);
	}

	#[test]
	fn invalid_values_fail_validation() {
		let mut config = GatewayConfig::default();
		assert!(config.validate().is_ok());

		config.supervisor.max_init_attempts = 0;
		assert!(matches!(config.validate(), Err(CliError::Runtime(_))));

		let mut config = GatewayConfig::default();
		config.bridge.program = " ".into();
		assert!(config.validate().is_err());
	}

	#[test]
	fn bad_listen_host_is_reported() {
		let listen = ListenConfig {
			host: "not a host".into(),
			port: 1,
		};
		assert!(listen.addr().is_err());
	}
}
