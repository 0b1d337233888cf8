use clap::Parser;
use pw_relay_cli::cli::Cli;
use pw_relay_cli::config::{RelayConfig, resolve_path};
use pw_relay_cli::{commands, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	let loaded = resolve_path(cli.config.clone()).and_then(|path| RelayConfig::load(&path).map(|config| (path, config)));

	let debug = loaded.as_ref().is_ok_and(|(_, config)| config.debug);
	logging::init_logging(if debug { cli.verbose.max(2) } else { cli.verbose });

	let result = match loaded {
		Ok((path, config)) => commands::dispatch(cli.command, &path, config).await,
		Err(err) => Err(err),
	};
	if let Err(err) = result {
		error!(target = "pw.relay", error = %format!("{err:#}"), "command failed");
		std::process::exit(1);
	}
}
