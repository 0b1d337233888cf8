//! Per-tab console and network ring buffers.
//!
//! Buffers are append-only; the oldest entry is dropped once a ring is full.
//! Otherwise eviction is whole-tab: a main-frame navigation, an explicit clear,
//! a detach, or the reaper empties a tab's buffers in one step.
//!
//! Network requests are held in a pending index keyed by the protocol's
//! request id until their response (or failure) arrives; only then are they
//! filed under the tab that reported the response.

use std::collections::{BTreeSet, HashMap, VecDeque};

use pw_relay_protocol::{ConsoleEntry, NetworkEntry, RequestMeta, ResponseMeta};
use tracing::debug;

use crate::backend::TabId;
use crate::options::TelemetryLimits;

#[derive(Debug)]
pub struct TelemetryStore {
	limits: TelemetryLimits,
	console: HashMap<TabId, VecDeque<ConsoleEntry>>,
	network: HashMap<TabId, VecDeque<NetworkEntry>>,
	pending: HashMap<String, RequestMeta>,
	pending_order: VecDeque<String>,
}

impl TelemetryStore {
	pub fn new(limits: TelemetryLimits) -> Self {
		Self {
			limits,
			console: HashMap::new(),
			network: HashMap::new(),
			pending: HashMap::new(),
			pending_order: VecDeque::new(),
		}
	}

	pub fn record_console(&mut self, tab: TabId, entry: ConsoleEntry) {
		let ring = self.console.entry(tab).or_default();
		push_bounded(ring, entry, self.limits.console_per_tab);
	}

	/// Stores request metadata until its response arrives. A repeated id
	/// (redirect) replaces the earlier metadata.
	pub fn record_request_start(&mut self, request_id: impl Into<String>, meta: RequestMeta) {
		let request_id = request_id.into();
		if self.pending.insert(request_id.clone(), meta).is_none() {
			self.pending_order.push_back(request_id);
		}

		while self.pending.len() > self.limits.pending_requests {
			let Some(oldest) = self.pending_order.pop_front() else {
				break;
			};
			self.pending.remove(&oldest);
		}
	}

	/// Promotes a pending request into `tab`'s buffer.
	///
	/// Unknown request ids are a no-op; returns whether anything was recorded.
	pub fn record_response(&mut self, tab: TabId, request_id: &str, response: ResponseMeta) -> bool {
		let Some(request) = self.pending.remove(request_id) else {
			debug!(target = "pw.relay.telemetry", %tab, request_id, "response without pending request; ignored");
			return false;
		};
		// `pending_order` mirrors `pending` exactly; eviction relies on it.
		if let Some(pos) = self.pending_order.iter().position(|id| id == request_id) {
			self.pending_order.remove(pos);
		}

		let entry = NetworkEntry {
			request_id: request_id.to_string(),
			request,
			response,
		};
		let ring = self.network.entry(tab).or_default();
		push_bounded(ring, entry, self.limits.network_per_tab);
		true
	}

	/// Copy of `tab`'s console buffer, oldest first.
	pub fn console(&self, tab: TabId) -> Vec<ConsoleEntry> {
		self.console.get(&tab).map(|ring| ring.iter().cloned().collect()).unwrap_or_default()
	}

	/// Copy of `tab`'s network buffer, oldest first.
	pub fn network(&self, tab: TabId) -> Vec<NetworkEntry> {
		self.network.get(&tab).map(|ring| ring.iter().cloned().collect()).unwrap_or_default()
	}

	pub fn clear(&mut self, tab: TabId) {
		self.console.remove(&tab);
		self.network.remove(&tab);
	}

	pub fn clear_console(&mut self, tab: TabId) {
		self.console.remove(&tab);
	}

	pub fn clear_network(&mut self, tab: TabId) {
		self.network.remove(&tab);
	}

	pub fn clear_all(&mut self) {
		self.console.clear();
		self.network.clear();
		self.pending.clear();
		self.pending_order.clear();
	}

	/// Tabs that currently own at least one buffer.
	pub fn tracked_tabs(&self) -> BTreeSet<TabId> {
		self.console.keys().chain(self.network.keys()).copied().collect()
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
	if capacity == 0 {
		return;
	}
	while ring.len() >= capacity {
		ring.pop_front();
	}
	ring.push_back(item);
}
