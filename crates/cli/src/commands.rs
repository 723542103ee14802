//! Subcommand dispatch.

use serde::Serialize;

use crate::cli::{Cli, Commands};
use crate::client::GatewayClient;
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::output::{self, ResultBuilder};
use crate::server;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let client = GatewayClient::new(&cli.url);
	let command = cli.command.name();

	match cli.command {
		Commands::Serve(args) => {
			let mut config = GatewayConfig::load(cli.config.as_deref())?;
			config.apply_overrides(&args);
			config.validate()?;
			server::serve(config).await?;
			Ok(())
		}
		Commands::Status => print(command, client.health().await?),
		Commands::Send(args) => print(command, client.send(&args.recipient, &args.body).await?),
		Commands::Recover => print(command, client.recover().await?),
		Commands::Restart => print(command, client.restart().await?),
		Commands::Clear => print(command, client.clear().await?),
	}
}

fn print<T: Serialize>(command: &str, data: T) -> Result<()> {
	output::print_result(&ResultBuilder::new(command).data(data).build());
	Ok(())
}
