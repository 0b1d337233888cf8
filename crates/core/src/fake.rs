//! In-memory browser backend for exercising the relay without a browser.
//!
//! # Example
//!
//! ```ignore
//! let (backend, controller, events) = FakeBrowserBuilder::new()
//!     .tab(3, "https://example.com/")
//!     .build();
//! let connection = Connection::new(backend, options, outbound_tx);
//! tokio::spawn(connection.run(inbound_rx, events));
//!
//! controller.emit(TabId(3), "Runtime.consoleAPICalled", json!({...}));
//! controller.unsolicited_detach(TabId(3), "target_closed");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use crate::backend::{AttachError, BackendError, BackendEvent, BrowserBackend, ExtensionInfo, TabId, TabInfo};

/// Builder for [`FakeBrowser`] instances.
#[derive(Default)]
pub struct FakeBrowserBuilder {
	tabs: Vec<TabInfo>,
	extensions: Vec<ExtensionInfo>,
}

impl FakeBrowserBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a tab titled after its id.
	pub fn tab(self, id: u64, url: &str) -> Self {
		let title = format!("Tab {id}");
		self.titled_tab(id, &title, url)
	}

	pub fn titled_tab(mut self, id: u64, title: &str, url: &str) -> Self {
		let index = self.tabs.len() as u32;
		self.tabs.push(TabInfo {
			id: TabId(id),
			title: title.to_string(),
			url: url.to_string(),
			index,
		});
		self
	}

	pub fn extension(mut self, id: &str, name: &str) -> Self {
		self.extensions.push(ExtensionInfo {
			id: id.to_string(),
			name: name.to_string(),
			enabled: true,
		});
		self
	}

	/// Builds the backend, its controller, and the passive event stream.
	pub fn build(self) -> (Arc<FakeBrowser>, FakeBrowserController, mpsc::UnboundedReceiver<BackendEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let next_tab_id = self.tabs.iter().map(|t| t.id.0).max().unwrap_or(0) + 1;
		let state = Arc::new(Mutex::new(FakeState {
			tabs: self.tabs,
			extensions: self.extensions,
			next_tab_id,
			contexts_on_enable: true,
			..Default::default()
		}));

		let browser = Arc::new(FakeBrowser {
			state: Arc::clone(&state),
			events_tx: events_tx.clone(),
		});
		let controller = FakeBrowserController { state, events_tx };
		(browser, controller, events_rx)
	}
}

#[derive(Default)]
struct FakeState {
	tabs: Vec<TabInfo>,
	extensions: Vec<ExtensionInfo>,
	attached: HashSet<TabId>,
	attach_failures: HashMap<TabId, VecDeque<AttachError>>,
	blocked_forever: HashMap<TabId, AttachError>,
	attach_gates: HashMap<TabId, Arc<Notify>>,
	detach_gates: HashMap<TabId, Arc<Notify>>,
	fail_list_tabs: bool,
	fail_enable: bool,
	contexts_on_enable: bool,
	next_tab_id: u64,
	next_context_id: i64,
	command_results: HashMap<String, Value>,
	commands: Vec<(TabId, String, Value)>,
	attach_calls: Vec<TabId>,
	detach_calls: Vec<TabId>,
	activated: Vec<TabId>,
}

impl FakeState {
	fn find(&self, tab: TabId) -> Option<&TabInfo> {
		self.tabs.iter().find(|t| t.id == tab)
	}

	fn reindex(&mut self) {
		for (i, tab) in self.tabs.iter_mut().enumerate() {
			tab.index = i as u32;
		}
	}
}

/// Scriptable [`BrowserBackend`].
pub struct FakeBrowser {
	state: Arc<Mutex<FakeState>>,
	events_tx: mpsc::UnboundedSender<BackendEvent>,
}

#[async_trait]
impl BrowserBackend for FakeBrowser {
	async fn attach(&self, tab: TabId) -> Result<(), AttachError> {
		let gate = {
			let mut state = self.state.lock();
			state.attach_calls.push(tab);
			state.attach_gates.get(&tab).cloned()
		};
		pass_gate(gate).await;

		let mut state = self.state.lock();
		if state.find(tab).is_none() {
			return Err(AttachError::TabNotFound(tab));
		}
		if let Some(err) = state.blocked_forever.get(&tab) {
			return Err(err.clone());
		}
		if let Some(err) = state.attach_failures.get_mut(&tab).and_then(VecDeque::pop_front) {
			return Err(err);
		}
		if state.attached.contains(&tab) {
			return Err(AttachError::AlreadyDebugged(format!("Another debugger is already attached to the tab with id: {tab}.")));
		}
		state.attached.insert(tab);
		Ok(())
	}

	async fn detach(&self, tab: TabId) -> Result<(), BackendError> {
		let gate = {
			let mut state = self.state.lock();
			state.detach_calls.push(tab);
			state.detach_gates.get(&tab).cloned()
		};
		pass_gate(gate).await;

		self.state.lock().attached.remove(&tab);
		Ok(())
	}

	async fn send_command(&self, tab: TabId, method: &str, params: Value) -> Result<Value, BackendError> {
		let mut state = self.state.lock();
		if state.find(tab).is_none() {
			return Err(BackendError::TabNotFound(tab));
		}
		if !state.attached.contains(&tab) {
			return Err(BackendError::NotAttached(tab));
		}
		state.commands.push((tab, method.to_string(), params));

		if method.ends_with(".enable") && state.fail_enable {
			return Err(BackendError::Protocol(format!("{method} is blocked by injected content")));
		}
		if method == "Runtime.enable" && state.contexts_on_enable {
			state.next_context_id += 1;
			let context_id = tab.0 as i64 * 100 + state.next_context_id;
			let _ = self.events_tx.send(BackendEvent::Protocol {
				tab,
				method: "Runtime.executionContextCreated".to_string(),
				params: json!({
					"context": {
						"id": context_id,
						"origin": "https://example.com",
						"name": "",
						"auxData": { "isDefault": true, "type": "default", "frameId": format!("frame-{tab}") }
					}
				}),
			});
		}

		Ok(state.command_results.get(method).cloned().unwrap_or_else(|| json!({})))
	}

	async fn list_tabs(&self) -> Result<Vec<TabInfo>, BackendError> {
		let state = self.state.lock();
		if state.fail_list_tabs {
			return Err(BackendError::Unavailable("tab enumeration failed".to_string()));
		}
		Ok(state.tabs.clone())
	}

	async fn tab(&self, tab: TabId) -> Result<Option<TabInfo>, BackendError> {
		let state = self.state.lock();
		if state.fail_list_tabs {
			return Err(BackendError::Unavailable("tab lookup failed".to_string()));
		}
		Ok(state.find(tab).cloned())
	}

	async fn create_tab(&self, url: Option<&str>) -> Result<TabInfo, BackendError> {
		let mut state = self.state.lock();
		let id = TabId(state.next_tab_id);
		state.next_tab_id += 1;
		let info = TabInfo {
			id,
			title: format!("Tab {id}"),
			url: url.unwrap_or("about:blank").to_string(),
			index: state.tabs.len() as u32,
		};
		state.tabs.push(info.clone());
		Ok(info)
	}

	async fn activate_tab(&self, tab: TabId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		if state.find(tab).is_none() {
			return Err(BackendError::TabNotFound(tab));
		}
		state.activated.push(tab);
		Ok(())
	}

	async fn close_tab(&self, tab: TabId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		if state.find(tab).is_none() {
			return Err(BackendError::TabNotFound(tab));
		}
		state.tabs.retain(|t| t.id != tab);
		state.attached.remove(&tab);
		state.reindex();
		Ok(())
	}

	async fn list_extensions(&self) -> Result<Vec<ExtensionInfo>, BackendError> {
		Ok(self.state.lock().extensions.clone())
	}
}

async fn pass_gate(gate: Option<Arc<Notify>>) {
	if let Some(gate) = gate {
		gate.notified().await;
	}
}

/// Handle for scripting a [`FakeBrowser`] and inspecting what the relay did.
#[derive(Clone)]
pub struct FakeBrowserController {
	state: Arc<Mutex<FakeState>>,
	events_tx: mpsc::UnboundedSender<BackendEvent>,
}

impl FakeBrowserController {
	pub fn add_tab(&self, id: u64, url: &str) {
		let mut state = self.state.lock();
		let index = state.tabs.len() as u32;
		state.tabs.push(TabInfo {
			id: TabId(id),
			title: format!("Tab {id}"),
			url: url.to_string(),
			index,
		});
		state.next_tab_id = state.next_tab_id.max(id + 1);
	}

	/// Closes a tab behind the relay's back. Does not emit a detach event.
	pub fn remove_tab(&self, id: TabId) {
		let mut state = self.state.lock();
		state.tabs.retain(|t| t.id != id);
		state.attached.remove(&id);
		state.reindex();
	}

	pub fn set_url(&self, id: TabId, url: &str) {
		if let Some(tab) = self.state.lock().tabs.iter_mut().find(|t| t.id == id) {
			tab.url = url.to_string();
		}
	}

	/// Fails the next attach to `tab` with `err`; queued failures are consumed in order.
	pub fn fail_next_attach(&self, tab: TabId, err: AttachError) {
		self.state.lock().attach_failures.entry(tab).or_default().push_back(err);
	}

	/// Fails every attach to `tab` until cleared with `None`.
	pub fn block_attach(&self, tab: TabId, err: Option<AttachError>) {
		let mut state = self.state.lock();
		match err {
			Some(err) => {
				state.blocked_forever.insert(tab, err);
			}
			None => {
				state.blocked_forever.remove(&tab);
			}
		}
	}

	/// Holds attaches to `tab` in flight until [`Self::release_attach`].
	pub fn hold_attach(&self, tab: TabId) {
		self.state.lock().attach_gates.insert(tab, Arc::new(Notify::new()));
	}

	/// Lets a held attach to `tab` complete.
	pub fn release_attach(&self, tab: TabId) {
		let gate = self.state.lock().attach_gates.remove(&tab);
		if let Some(gate) = gate {
			gate.notify_one();
		}
	}

	/// Holds detaches of `tab` in flight until [`Self::release_detach`].
	pub fn hold_detach(&self, tab: TabId) {
		self.state.lock().detach_gates.insert(tab, Arc::new(Notify::new()));
	}

	pub fn release_detach(&self, tab: TabId) {
		let gate = self.state.lock().detach_gates.remove(&tab);
		if let Some(gate) = gate {
			gate.notify_one();
		}
	}

	pub fn fail_list_tabs(&self, fail: bool) {
		self.state.lock().fail_list_tabs = fail;
	}

	/// Makes every `*.enable` command fail.
	pub fn fail_enable(&self, fail: bool) {
		self.state.lock().fail_enable = fail;
	}

	/// Controls whether `Runtime.enable` announces a default execution context.
	pub fn contexts_on_enable(&self, enabled: bool) {
		self.state.lock().contexts_on_enable = enabled;
	}

	pub fn set_command_result(&self, method: &str, result: Value) {
		self.state.lock().command_results.insert(method.to_string(), result);
	}

	/// Pushes a protocol event as if observed on `tab`.
	pub fn emit(&self, tab: TabId, method: &str, params: Value) {
		let _ = self.events_tx.send(BackendEvent::Protocol {
			tab,
			method: method.to_string(),
			params,
		});
	}

	/// Drops the attachment and reports it as unsolicited.
	pub fn unsolicited_detach(&self, tab: TabId, reason: &str) {
		self.state.lock().attached.remove(&tab);
		let _ = self.events_tx.send(BackendEvent::Detached {
			tab,
			reason: reason.to_string(),
		});
	}

	pub fn attached(&self) -> Vec<TabId> {
		let mut tabs: Vec<_> = self.state.lock().attached.iter().copied().collect();
		tabs.sort();
		tabs
	}

	pub fn is_attached(&self, tab: TabId) -> bool {
		self.state.lock().attached.contains(&tab)
	}

	pub fn attach_calls(&self) -> Vec<TabId> {
		self.state.lock().attach_calls.clone()
	}

	pub fn detach_calls(&self) -> Vec<TabId> {
		self.state.lock().detach_calls.clone()
	}

	pub fn activated(&self) -> Vec<TabId> {
		self.state.lock().activated.clone()
	}

	/// Commands sent through `send_command`, in order.
	pub fn commands(&self) -> Vec<(TabId, String, Value)> {
		self.state.lock().commands.clone()
	}

	pub fn tab_ids(&self) -> Vec<TabId> {
		self.state.lock().tabs.iter().map(|t| t.id).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn attach_twice_reports_already_debugged() {
		let (browser, _controller, _events) = FakeBrowserBuilder::new().tab(1, "https://a.test/").build();
		browser.attach(TabId(1)).await.unwrap();
		let err = browser.attach(TabId(1)).await.unwrap_err();
		assert!(matches!(err, AttachError::AlreadyDebugged(_)));
	}

	#[tokio::test]
	async fn runtime_enable_announces_default_context() {
		let (browser, _controller, mut events) = FakeBrowserBuilder::new().tab(2, "https://a.test/").build();
		browser.attach(TabId(2)).await.unwrap();
		browser.send_command(TabId(2), "Runtime.enable", json!({})).await.unwrap();

		match events.recv().await.unwrap() {
			BackendEvent::Protocol { tab, method, params } => {
				assert_eq!(tab, TabId(2));
				assert_eq!(method, "Runtime.executionContextCreated");
				assert_eq!(params["context"]["auxData"]["isDefault"], true);
			}
			other => panic!("unexpected event {other:?}"),
		}
	}

	#[tokio::test]
	async fn queued_attach_failures_are_consumed_in_order() {
		let (browser, controller, _events) = FakeBrowserBuilder::new().tab(4, "https://a.test/").build();
		controller.fail_next_attach(TabId(4), AttachError::Other("first".into()));
		assert!(browser.attach(TabId(4)).await.is_err());
		assert!(browser.attach(TabId(4)).await.is_ok());
		assert_eq!(controller.attach_calls(), vec![TabId(4), TabId(4)]);
	}

	#[tokio::test]
	async fn held_attach_waits_for_release() {
		let (browser, controller, _events) = FakeBrowserBuilder::new().tab(6, "https://a.test/").build();
		controller.hold_attach(TabId(6));
		let pending = tokio::spawn({
			let browser = Arc::clone(&browser);
			async move { browser.attach(TabId(6)).await }
		});
		for _ in 0..3 {
			tokio::task::yield_now().await;
		}
		assert_eq!(controller.attach_calls(), vec![TabId(6)]);
		assert!(!controller.is_attached(TabId(6)));

		controller.release_attach(TabId(6));
		pending.await.unwrap().unwrap();
		assert!(controller.is_attached(TabId(6)));
	}

	#[tokio::test]
	async fn closing_tab_reindexes_remaining() {
		let (browser, _controller, _events) = FakeBrowserBuilder::new().tab(1, "https://a.test/").tab(2, "https://b.test/").build();
		browser.close_tab(TabId(1)).await.unwrap();
		let tabs = browser.list_tabs().await.unwrap();
		assert_eq!(tabs.len(), 1);
		assert_eq!(tabs[0].index, 0);
	}
}
