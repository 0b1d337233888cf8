//! Capability interface to the browser's debugging primitive.
//!
//! The relay core never talks to a browser directly. Everything it needs,
//! attaching to a tab, sending protocol commands, enumerating tabs, is behind
//! [`BrowserBackend`]. Passive traffic (protocol events and unsolicited
//! detaches) arrives separately as [`BackendEvent`]s on a channel handed to the
//! connection, so it is processed as ordinary steps of the connection loop.

use async_trait::async_trait;
use pw_relay_protocol::TabDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Browser-assigned tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl std::fmt::Display for TabId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Snapshot of a live tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
	pub id: TabId,
	pub title: String,
	pub url: String,
	/// Position in the tab strip.
	pub index: u32,
}

impl TabInfo {
	pub fn descriptor(&self) -> TabDescriptor {
		TabDescriptor {
			id: self.id.0,
			title: self.title.clone(),
			url: self.url.clone(),
			index: self.index,
		}
	}
}

/// Installed browser extension, as far as the backend can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
	pub id: String,
	pub name: String,
	pub enabled: bool,
}

/// Why the debugging primitive refused to attach.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachError {
	/// DevTools or another automation client owns the tab.
	#[error("another debugger is already attached: {0}")]
	AlreadyDebugged(String),
	/// Content injected by another extension blocks the debugging channel.
	#[error("debugger blocked: {0}")]
	Blocked(String),
	#[error("tab {0} does not exist")]
	TabNotFound(TabId),
	#[error("{0}")]
	Other(String),
}

/// Failure of a non-attach backend operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
	#[error("tab {0} does not exist")]
	TabNotFound(TabId),
	#[error("not attached to tab {0}")]
	NotAttached(TabId),
	/// The protocol answered the command with an error.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// The browser link itself is unusable.
	#[error("browser unavailable: {0}")]
	Unavailable(String),
}

/// Passive notification from the debugging primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
	/// Protocol event observed on an attached tab.
	Protocol { tab: TabId, method: String, params: Value },
	/// The attachment ended without the relay asking for it.
	Detached { tab: TabId, reason: String },
}

/// Per-browser implementation of the debugging primitive.
///
/// `detach` must tolerate tabs that are already detached.
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
	async fn attach(&self, tab: TabId) -> Result<(), AttachError>;

	async fn detach(&self, tab: TabId) -> Result<(), BackendError>;

	async fn send_command(&self, tab: TabId, method: &str, params: Value) -> Result<Value, BackendError>;

	async fn list_tabs(&self) -> Result<Vec<TabInfo>, BackendError>;

	/// Looks up a single tab; `Ok(None)` when it no longer exists.
	async fn tab(&self, tab: TabId) -> Result<Option<TabInfo>, BackendError>;

	async fn create_tab(&self, url: Option<&str>) -> Result<TabInfo, BackendError>;

	/// Brings the tab to the foreground.
	async fn activate_tab(&self, tab: TabId) -> Result<(), BackendError>;

	async fn close_tab(&self, tab: TabId) -> Result<(), BackendError>;

	/// Installed extensions; used only for diagnostics.
	async fn list_extensions(&self) -> Result<Vec<ExtensionInfo>, BackendError>;
}
