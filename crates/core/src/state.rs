//! State owned by one connection.
//!
//! Everything lives behind a single mutex in [`RelayContext`]. The lock is
//! only taken for synchronous bookkeeping and never held across an `.await`;
//! async drivers re-check their epoch after every suspension point instead.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pw_relay_protocol::TabDescriptor;
use serde_json::Value;

use crate::attachment::{AttachmentPhase, AttachmentSlot};
use crate::backend::{BrowserBackend, TabId};
use crate::options::RelayOptions;
use crate::registry::{SessionRegistry, SlotKey};
use crate::telemetry::TelemetryStore;

/// What the server has told us about this connection.
#[derive(Debug, Default, Clone)]
pub struct PeerInfo {
	pub connection_id: Option<String>,
	pub client_name: Option<String>,
	pub status: Option<Value>,
}

#[derive(Debug)]
pub struct RelayState {
	pub registry: SessionRegistry,
	pub slots: HashMap<SlotKey, AttachmentSlot>,
	pub telemetry: TelemetryStore,
	/// Extension id to display name, learned from injected execution contexts.
	pub known_extensions: HashMap<String, String>,
	pub peer: PeerInfo,
}

impl RelayState {
	pub fn new(options: &RelayOptions) -> Self {
		Self {
			registry: SessionRegistry::new(),
			slots: HashMap::new(),
			telemetry: TelemetryStore::new(options.limits),
			known_extensions: HashMap::new(),
			peer: PeerInfo::default(),
		}
	}

	/// Slot for `key`, created detached on first use.
	pub fn slot_mut(&mut self, key: &SlotKey) -> &mut AttachmentSlot {
		self.slots.entry(key.clone()).or_default()
	}

	pub fn phase(&self, key: &SlotKey) -> AttachmentPhase {
		self.slots.get(key).map(AttachmentSlot::phase).unwrap_or(AttachmentPhase::Detached)
	}

	/// Tab of `key` when its slot is fully attached.
	pub fn attached_tab(&self, key: &SlotKey) -> Option<TabId> {
		match self.phase(key) {
			AttachmentPhase::Attached => self.registry.resolve_tab(key),
			_ => None,
		}
	}

	/// Releases `key`'s attachment: slot to `Detached`, binding and telemetry dropped.
	///
	/// Returns the tab that was held. Idempotent.
	pub fn release(&mut self, key: &SlotKey) -> Option<TabId> {
		if let Some(slot) = self.slots.get_mut(key) {
			slot.release();
		}
		let tab = self.registry.unbind(key)?;
		self.telemetry.clear(tab);
		Some(tab)
	}

	/// Drops a tenant entirely after releasing its attachment.
	pub fn forget(&mut self, key: &SlotKey) -> Option<TabId> {
		let tab = self.release(key);
		self.slots.remove(key);
		tab
	}

	/// Drops everything; used on connection teardown.
	pub fn clear(&mut self) {
		self.registry.clear();
		self.slots.clear();
		self.telemetry.clear_all();
		self.known_extensions.clear();
	}
}

/// Shared handle the connection loop and its spawned request tasks work on.
pub struct RelayContext {
	pub(crate) state: Mutex<RelayState>,
	pub(crate) backend: Arc<dyn BrowserBackend>,
	pub(crate) options: RelayOptions,
}

impl RelayContext {
	pub fn new(backend: Arc<dyn BrowserBackend>, options: RelayOptions) -> Self {
		Self {
			state: Mutex::new(RelayState::new(&options)),
			backend,
			options,
		}
	}

	pub fn options(&self) -> &RelayOptions {
		&self.options
	}

	/// Runs `f` under the state lock.
	pub fn with_state<R>(&self, f: impl FnOnce(&mut RelayState) -> R) -> R {
		f(&mut self.state.lock())
	}

	/// Descriptor of `key`'s attached tab, or `None` when detached or the tab vanished.
	pub async fn current_tab(&self, key: &SlotKey) -> Option<TabDescriptor> {
		let tab = self.state.lock().attached_tab(key)?;
		match self.backend.tab(tab).await {
			Ok(info) => info.map(|info| info.descriptor()),
			Err(err) => {
				tracing::debug!(target = "pw.relay.dispatch", %tab, error = %err, "current tab lookup failed");
				None
			}
		}
	}
}
