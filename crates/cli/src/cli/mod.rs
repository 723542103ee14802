
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::styles::cli_styles;

pub const DEFAULT_URL: &str = "http://127.0.0.1:3000";

/// Root CLI for the courier gateway.
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Supervised delivery gateway for a single automated chat session")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file for `serve` (defaults to <config dir>/courier/config.json)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Gateway base URL used by client commands
	#[arg(long, global = true, value_name = "URL", default_value = DEFAULT_URL)]
	pub url: String,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the supervisor and its HTTP gateway until SIGINT/SIGTERM.
	Serve(ServeArgs),
	/// Print the gateway's health snapshot.
	Status,
	/// Queue a message and wait for its receipt.
	Send(SendArgs),
	/// Ask for a recovery of the current session.
	Recover,
	/// Discard the session and start over, re-arming init attempts.
	Restart,
	/// Drop every queued message; callers resolve through their deadlines.
	Clear,
}

impl Commands {
	/// Name used in result envelopes.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Serve(_) => "serve",
			Commands::Status => "status",
			Commands::Send(_) => "send",
			Commands::Recover => "recover",
			Commands::Restart => "restart",
			Commands::Clear => "clear",
		}
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Address to listen on
	#[arg(long, value_name = "HOST")]
	pub host: Option<String>,

	/// Port to listen on
	#[arg(short, long, value_name = "PORT")]
	pub port: Option<u16>,

	/// Profile directory that keeps the session's credentials
	#[arg(long, value_name = "DIR")]
	pub profile_dir: Option<PathBuf>,

	/// Automation bridge executable
	#[arg(long, value_name = "PROGRAM")]
	pub bridge_program: Option<String>,

	/// Arguments for the bridge executable (repeatable)
	#[arg(long = "bridge-arg", value_name = "ARG", allow_hyphen_values = true)]
	pub bridge_args: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
	/// Channel address of the recipient
	pub recipient: String,

	/// Message text
	pub body: String,
}
