use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pw-relay")]
#[command(about = "Bridge an MCP automation server to tabs of a running browser")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	/// Config file to use instead of the per-user default
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Connect to the server and relay until interrupted
	Run(RunArgs),

	/// Show the persistent client id
	Identity {
		/// Replace the client id with a freshly generated one
		#[arg(long)]
		reset: bool,
	},

	/// Print the effective configuration
	Config,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
	/// Automation server WebSocket URL
	#[arg(long, value_name = "URL")]
	pub server: Option<String>,

	/// Browser remote-debugging port
	#[arg(long, value_name = "PORT", conflicts_with = "cdp_endpoint")]
	pub cdp_port: Option<u16>,

	/// Browser WebSocket debugger URL (skips /json/version discovery)
	#[arg(long, value_name = "URL")]
	pub cdp_endpoint: Option<String>,

	/// Bearer token presented to the server
	#[arg(long)]
	pub token: Option<String>,

	/// Start new attachments with console capture suppressed
	#[arg(long)]
	pub stealth: bool,

	/// Exit when the first connection ends instead of reconnecting
	#[arg(long)]
	pub once: bool,
}
