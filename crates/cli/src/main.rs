use clap::Parser;
use courier_cli::cli::Cli;
use courier_cli::error::CliError;
use courier_cli::output::{self, CommandResult, ResultBuilder};
use courier_cli::{commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let command = cli.command.name();
	if let Err(err) = commands::dispatch(cli).await {
		let code = err.exit_code();
		handle_error(command, err);
		std::process::exit(code);
	}
}

fn handle_error(command: &str, err: CliError) {
	let cmd_error = err.to_command_error();
	output::print_error_stderr(&cmd_error);

	// `serve` has no stdout contract; client commands always end with an envelope.
	if command != "serve" {
		let result: CommandResult<()> = ResultBuilder::new(command).error(cmd_error.code, cmd_error.message).build();
		output::print_result(&result);
	}
}
