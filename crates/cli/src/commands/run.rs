//! `pw-relay run`: connect browser and server, relay, reconnect.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use pw_relay_runtime::{BrowserEndpoint, CdpBackend, connect_server, fetch_version};
use relay::{Connection, ConnectionExit, RelayOptions};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::config::RelayConfig;

pub const DEFAULT_CDP_PORT: u16 = 9222;
const DEFAULT_BROWSER_NAME: &str = "Chrome";

/// Effective run settings: flags over config file over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
	pub server_url: String,
	pub browser: BrowserEndpoint,
	pub token: Option<String>,
	pub stealth: bool,
	pub browser_name: Option<String>,
	pub client_id: String,
	pub test_page_url: Option<String>,
	pub reaper_interval: Option<Duration>,
}

impl Settings {
	pub fn resolve(config: &RelayConfig, args: &RunArgs) -> Result<Self> {
		let server_url = args
			.server
			.clone()
			.or_else(|| config.server_url.clone())
			.context("no server URL; pass --server or set serverUrl in the config file")?;
		let client_id = config
			.client_id
			.clone()
			.ok_or_else(|| anyhow!("no client id; run `pw-relay identity` first"))?;

		let browser = if let Some(url) = &args.cdp_endpoint {
			BrowserEndpoint::WebSocket(url.clone())
		} else if let Some(port) = args.cdp_port {
			BrowserEndpoint::Port(port)
		} else if let Some(url) = &config.cdp_endpoint {
			BrowserEndpoint::WebSocket(url.clone())
		} else {
			BrowserEndpoint::Port(config.cdp_port.unwrap_or(DEFAULT_CDP_PORT))
		};

		Ok(Self {
			server_url,
			browser,
			token: args.token.clone().or_else(|| config.token.clone()),
			stealth: args.stealth || config.stealth,
			browser_name: config.browser_name.clone(),
			client_id,
			test_page_url: config.test_page_url.clone(),
			reaper_interval: config.reaper_interval_secs.map(Duration::from_secs),
		})
	}

	/// Relay options; `detected` is the browser product reported by discovery.
	pub fn relay_options(&self, detected: Option<&str>) -> RelayOptions {
		let name = self.browser_name.as_deref().or(detected).unwrap_or(DEFAULT_BROWSER_NAME);
		let mut options = RelayOptions::new(name, self.client_id.clone())
			.with_token(self.token.clone())
			.with_default_stealth(self.stealth);
		if let Some(url) = &self.test_page_url {
			options = options.with_test_page_url(url.clone());
		}
		if let Some(interval) = self.reaper_interval {
			options = options.with_reaper_interval(interval);
		}
		options
	}
}

/// Exponential reconnect delay: 1 s doubling up to 30 s.
#[derive(Debug, Clone)]
pub struct Backoff {
	next: Duration,
}

impl Backoff {
	pub const INITIAL: Duration = Duration::from_secs(1);
	pub const MAX: Duration = Duration::from_secs(30);
	/// A connection that lasted this long restarts the schedule.
	pub const STABLE: Duration = Duration::from_secs(10);

	pub fn new() -> Self {
		Self { next: Self::INITIAL }
	}

	pub fn next_delay(&mut self) -> Duration {
		let delay = self.next;
		self.next = (self.next * 2).min(Self::MAX);
		delay
	}

	pub fn reset(&mut self) {
		self.next = Self::INITIAL;
	}

	/// Resets only after a connection that stayed up for [`Self::STABLE`].
	pub fn connection_ended(&mut self, lived: Duration) {
		if lived >= Self::STABLE {
			self.reset();
		}
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Self::new()
	}
}

pub async fn execute(args: RunArgs, path: &Path, mut config: RelayConfig) -> Result<()> {
	if config.ensure_client_id() {
		config.save(path).context("failed to persist client id")?;
		info!(target = "pw.relay", path = %path.display(), "generated client id");
	}
	let settings = Settings::resolve(&config, &args)?;
	let mut backoff = Backoff::new();

	loop {
		let started = Instant::now();
		let outcome = tokio::select! {
			outcome = session(&settings) => outcome,
			_ = tokio::signal::ctrl_c() => {
				info!(target = "pw.relay", "interrupted");
				return Ok(());
			}
		};

		match outcome {
			Ok(ConnectionExit::ReloadRequested) => {
				info!(target = "pw.relay", "reload requested; reconnecting");
				backoff.reset();
				if args.once {
					return Ok(());
				}
				continue;
			}
			Ok(exit) => {
				let lived = started.elapsed();
				warn!(target = "pw.relay", ?exit, lived_ms = lived.as_millis() as u64, "connection ended");
				backoff.connection_ended(lived);
				if args.once {
					return Ok(());
				}
			}
			Err(err) => {
				if args.once {
					return Err(err);
				}
				warn!(target = "pw.relay", error = %format!("{err:#}"), "connection failed");
			}
		}

		let delay = backoff.next_delay();
		info!(target = "pw.relay", delay_ms = delay.as_millis() as u64, "reconnecting");
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = tokio::signal::ctrl_c() => {
				info!(target = "pw.relay", "interrupted");
				return Ok(());
			}
		}
	}
}

/// One browser + server connection, run to completion.
async fn session(settings: &Settings) -> Result<ConnectionExit> {
	let (ws_url, product) = match &settings.browser {
		BrowserEndpoint::Port(port) => {
			let info = fetch_version(*port)
				.await
				.with_context(|| format!("no browser with remote debugging on port {port}"))?;
			let product = info.product().map(str::to_string);
			(info.web_socket_debugger_url, product)
		}
		endpoint => (endpoint.resolve().await?, None),
	};

	let (backend, events) = CdpBackend::connect(&ws_url)
		.await
		.with_context(|| format!("failed to connect to browser at {ws_url}"))?;
	let link = connect_server(&settings.server_url, settings.token.as_deref())
		.await
		.with_context(|| format!("failed to connect to server at {}", settings.server_url))?;

	let options = settings.relay_options(product.as_deref());
	info!(target = "pw.relay", browser = %options.browser_name, client_id = %options.client_id, "relaying");
	let connection = Connection::new(Arc::new(backend), options, link.outbound);
	Ok(connection.run(link.inbound, events).await)
}
