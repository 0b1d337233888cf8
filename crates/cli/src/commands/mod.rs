use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::Commands;
use crate::config::RelayConfig;

pub mod run;

pub async fn dispatch(command: Commands, path: &Path, config: RelayConfig) -> Result<()> {
	match command {
		Commands::Run(args) => run::execute(args, path, config).await,
		Commands::Identity { reset } => identity(reset, path, config),
		Commands::Config => show_config(path, &config),
	}
}

fn identity(reset: bool, path: &Path, mut config: RelayConfig) -> Result<()> {
	let changed = if reset {
		config.reset_client_id();
		true
	} else {
		config.ensure_client_id()
	};
	if changed {
		config.save(path).context("failed to persist client id")?;
	}
	if let Some(id) = &config.client_id {
		println!("{id}");
	}
	Ok(())
}

fn show_config(path: &Path, config: &RelayConfig) -> Result<()> {
	let text = serde_json::to_string_pretty(&config.redacted()).context("failed to render config")?;
	println!("# {}", path.display());
	println!("{text}");
	Ok(())
}
