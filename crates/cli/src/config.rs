//! Per-user configuration file.
//!
//! Stored as camelCase JSON at `<config dir>/pw-relay/config.json`. Every
//! field is optional so older and hand-written files keep loading; the
//! `schema` field guards against files written by a newer release.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
	pub schema: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub server_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cdp_port: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cdp_endpoint: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub browser_name: Option<String>,
	/// Generated on first run and kept across restarts and upgrades.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	pub stealth: bool,
	/// Same as `-vv`.
	pub debug: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub test_page_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reaper_interval_secs: Option<u64>,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			schema: SCHEMA_VERSION,
			server_url: None,
			cdp_port: None,
			cdp_endpoint: None,
			token: None,
			browser_name: None,
			client_id: None,
			stealth: false,
			debug: false,
			test_page_url: None,
			reaper_interval_secs: None,
		}
	}
}

/// Default location, when the platform has a config directory.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("pw-relay").join("config.json"))
}

/// `explicit` if given, else [`default_path`].
pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
	match explicit {
		Some(path) => Ok(path),
		None => default_path().context("no per-user config directory on this platform; pass --config"),
	}
}

impl RelayConfig {
	/// Reads `path`; a missing file yields defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let text = match fs::read_to_string(path) {
			Ok(text) => text,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
		};

		let mut config: Self = serde_json::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))?;
		if config.schema > SCHEMA_VERSION {
			bail!(
				"{} uses config schema {}, newer than this build supports ({SCHEMA_VERSION})",
				path.display(),
				config.schema
			);
		}
		config.schema = SCHEMA_VERSION;
		Ok(config)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
		}
		let text = serde_json::to_string_pretty(self).context("failed to serialize config")?;
		fs::write(path, text + "\n").with_context(|| format!("failed to write {}", path.display()))
	}

	/// Generates a client id if none is stored; returns `true` when one was created.
	pub fn ensure_client_id(&mut self) -> bool {
		if self.client_id.as_deref().is_some_and(|id| !id.is_empty()) {
			return false;
		}
		self.client_id = Some(new_client_id());
		true
	}

	/// Replaces the client id and returns the new value.
	pub fn reset_client_id(&mut self) -> String {
		let id = new_client_id();
		self.client_id = Some(id.clone());
		id
	}

	/// Copy suitable for display, with the token masked.
	pub fn redacted(&self) -> Self {
		let mut shown = self.clone();
		if shown.token.is_some() {
			shown.token = Some("***".into());
		}
		shown
	}
}

fn new_client_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
