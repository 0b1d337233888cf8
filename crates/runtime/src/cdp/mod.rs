//! Chrome DevTools Protocol backend over the browser-level WebSocket.
//!
//! One socket carries every tab. Attaching uses flattened target sessions:
//! commands for a tab carry its `sessionId` and that tab's events come back
//! tagged with the same id, so routing is a table lookup in both directions.
//!
//! Page targets get small integer [`TabId`]s on first sight. The mapping lives
//! as long as the backend, so ids handed to the relay stay valid across
//! detach/attach cycles.
//!
//! `Target.detachedFromTarget` for a session the relay still holds becomes a
//! [`BackendEvent::Detached`]; sessions the relay detached itself are dropped
//! from the table first and their detach notice finds nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relay::{AttachError, BackendError, BackendEvent, BrowserBackend, ExtensionInfo, TabId, TabInfo};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::discovery::validate_ws_url;
use crate::error::Result;

const EXTENSION_SCHEME: &str = "chrome-extension://";

type CallResult = std::result::Result<Value, BackendError>;

/// [`BrowserBackend`] speaking CDP to one browser.
#[derive(Clone)]
pub struct CdpBackend {
	shared: Arc<Shared>,
}

struct Shared {
	outbound: mpsc::UnboundedSender<String>,
	/// `None` once the link is gone.
	pending: Mutex<Option<HashMap<u64, oneshot::Sender<CallResult>>>>,
	next_id: AtomicU64,
	targets: Mutex<Targets>,
	events: Mutex<Option<mpsc::UnboundedSender<BackendEvent>>>,
}

#[derive(Default)]
struct Targets {
	last_tab: u64,
	tabs: HashMap<String, TabId>,
	target_ids: HashMap<TabId, String>,
	sessions: HashMap<TabId, String>,
	session_tabs: HashMap<String, TabId>,
}

impl Targets {
	fn tab_for(&mut self, target_id: &str) -> TabId {
		if let Some(tab) = self.tabs.get(target_id) {
			return *tab;
		}
		self.last_tab += 1;
		let tab = TabId(self.last_tab);
		self.tabs.insert(target_id.to_string(), tab);
		self.target_ids.insert(tab, target_id.to_string());
		tab
	}

	fn target_of(&self, tab: TabId) -> Option<String> {
		self.target_ids.get(&tab).cloned()
	}

	fn session_of(&self, tab: TabId) -> Option<String> {
		self.sessions.get(&tab).cloned()
	}

	fn session_tab(&self, session: &str) -> Option<TabId> {
		self.session_tabs.get(session).copied()
	}

	fn bind_session(&mut self, tab: TabId, session: &str) {
		if let Some(previous) = self.sessions.insert(tab, session.to_string()) {
			self.session_tabs.remove(&previous);
		}
		self.session_tabs.insert(session.to_string(), tab);
	}

	fn take_session(&mut self, tab: TabId) -> Option<String> {
		let session = self.sessions.remove(&tab)?;
		self.session_tabs.remove(&session);
		Some(session)
	}

	fn drop_session(&mut self, session: &str) -> Option<TabId> {
		let tab = self.session_tabs.remove(session)?;
		self.sessions.remove(&tab);
		Some(tab)
	}

	/// Forgets a closed target; reports its tab and whether it was attached.
	fn forget_target(&mut self, target_id: &str) -> Option<(TabId, bool)> {
		let tab = self.tabs.remove(target_id)?;
		self.target_ids.remove(&tab);
		let attached = self.take_session(tab).is_some();
		Some((tab, attached))
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
	target_id: String,
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	title: String,
	#[serde(default)]
	url: String,
}

impl CdpBackend {
	/// Connects to a browser WebSocket URL and enables target discovery.
	pub async fn connect(ws_url: &str) -> Result<(Self, mpsc::UnboundedReceiver<BackendEvent>)> {
		validate_ws_url(ws_url)?;
		let (socket, _) = connect_async(ws_url).await?;
		let (mut sink, mut stream) = socket.split();
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

		tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				if let Err(err) = sink.send(Message::Text(text)).await {
					warn!(target = "pw.relay.cdp", error = %err, "browser socket write failed");
					break;
				}
			}
			let _ = sink.close().await;
		});

		tokio::spawn(async move {
			while let Some(message) = stream.next().await {
				match message {
					Ok(Message::Text(text)) => {
						if inbound_tx.send(text).is_err() {
							break;
						}
					}
					Ok(Message::Close(frame)) => {
						debug!(target = "pw.relay.cdp", ?frame, "browser closed the socket");
						break;
					}
					Ok(_) => {}
					Err(err) => {
						warn!(target = "pw.relay.cdp", error = %err, "browser socket read failed");
						break;
					}
				}
			}
		});

		let (backend, events) = Self::from_channels(outbound_tx, inbound_rx);
		backend.shared.call(None, "Target.setDiscoverTargets", json!({ "discover": true })).await?;
		info!(target = "pw.relay.cdp", url = ws_url, "connected to browser");
		Ok((backend, events))
	}

	/// Builds a backend over raw text channels; the socket is someone else's problem.
	///
	/// The returned event stream ends when `inbound` does.
	pub fn from_channels(
		outbound: mpsc::UnboundedSender<String>,
		mut inbound: mpsc::UnboundedReceiver<String>,
	) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			outbound,
			pending: Mutex::new(Some(HashMap::new())),
			next_id: AtomicU64::new(1),
			targets: Mutex::new(Targets::default()),
			events: Mutex::new(Some(events_tx)),
		});

		let reader = Arc::clone(&shared);
		tokio::spawn(async move {
			while let Some(text) = inbound.recv().await {
				reader.route(&text);
			}
			reader.close();
		});

		(Self { shared }, events_rx)
	}

	async fn targets(&self) -> std::result::Result<Vec<TargetInfo>, BackendError> {
		let result = self.shared.call(None, "Target.getTargets", json!({})).await?;
		serde_json::from_value(result.get("targetInfos").cloned().unwrap_or(Value::Null))
			.map_err(|err| BackendError::Protocol(format!("malformed Target.getTargets result: {err}")))
	}

	/// Target id of `tab`, refreshing the table once if it is unknown.
	async fn target_id(&self, tab: TabId) -> std::result::Result<Option<String>, BackendError> {
		let known = self.shared.targets.lock().target_of(tab);
		if known.is_some() {
			return Ok(known);
		}
		self.list_tabs().await?;
		Ok(self.shared.targets.lock().target_of(tab))
	}

	async fn require_target(&self, tab: TabId) -> std::result::Result<String, BackendError> {
		self.target_id(tab).await?.ok_or(BackendError::TabNotFound(tab))
	}
}

impl Shared {
	async fn call(&self, session: Option<&str>, method: &str, params: Value) -> CallResult {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let mut frame = json!({ "id": id, "method": method, "params": params });
		if let Some(session) = session {
			frame["sessionId"] = Value::from(session);
		}

		let (tx, rx) = oneshot::channel();
		match self.pending.lock().as_mut() {
			Some(pending) => {
				pending.insert(id, tx);
			}
			None => return Err(link_closed()),
		}

		if self.outbound.send(frame.to_string()).is_err() {
			if let Some(pending) = self.pending.lock().as_mut() {
				pending.remove(&id);
			}
			return Err(link_closed());
		}
		trace!(target = "pw.relay.cdp", id, method, session, "command sent");

		rx.await.unwrap_or_else(|_| Err(link_closed()))
	}

	fn route(&self, text: &str) {
		let message: Value = match serde_json::from_str(text) {
			Ok(message) => message,
			Err(err) => {
				warn!(target = "pw.relay.cdp", error = %err, "unparseable message from browser");
				return;
			}
		};

		if let Some(id) = message.get("id").and_then(Value::as_u64) {
			self.complete(id, &message);
			return;
		}

		let Some(method) = message.get("method").and_then(Value::as_str) else {
			debug!(target = "pw.relay.cdp", "message without id or method ignored");
			return;
		};
		let params = message.get("params").cloned().unwrap_or(Value::Null);

		match method {
			"Target.detachedFromTarget" => {
				let tab = params
					.get("sessionId")
					.and_then(Value::as_str)
					.and_then(|session| self.targets.lock().drop_session(session));
				if let Some(tab) = tab {
					self.emit(BackendEvent::Detached {
						tab,
						reason: "target_detached".into(),
					});
				}
			}
			"Target.targetDestroyed" => {
				let gone = params
					.get("targetId")
					.and_then(Value::as_str)
					.and_then(|target| self.targets.lock().forget_target(target));
				if let Some((tab, true)) = gone {
					self.emit(BackendEvent::Detached {
						tab,
						reason: "target_closed".into(),
					});
				}
			}
			"Target.targetCrashed" => {
				let tab = params.get("targetId").and_then(Value::as_str).and_then(|target| {
					let mut targets = self.targets.lock();
					let tab = targets.tabs.get(target).copied()?;
					targets.take_session(tab).map(|_| tab)
				});
				if let Some(tab) = tab {
					self.emit(BackendEvent::Detached {
						tab,
						reason: "target_crashed".into(),
					});
				}
			}
			_ => {
				let tab = message
					.get("sessionId")
					.and_then(Value::as_str)
					.and_then(|session| self.targets.lock().session_tab(session));
				match tab {
					Some(tab) => self.emit(BackendEvent::Protocol {
						tab,
						method: method.to_string(),
						params,
					}),
					None => trace!(target = "pw.relay.cdp", method, "event for no attached tab"),
				}
			}
		}
	}

	fn complete(&self, id: u64, message: &Value) {
		let sender = self.pending.lock().as_mut().and_then(|pending| pending.remove(&id));
		let Some(sender) = sender else {
			debug!(target = "pw.relay.cdp", id, "response for unknown command");
			return;
		};
		let result = match message.get("error") {
			Some(error) => Err(BackendError::Protocol(error_text(error))),
			None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
		};
		let _ = sender.send(result);
	}

	fn emit(&self, event: BackendEvent) {
		if let Some(events) = self.events.lock().as_ref() {
			let _ = events.send(event);
		}
	}

	fn close(&self) {
		let pending = self.pending.lock().take();
		let failed = pending.map_or(0, |pending| pending.len());
		self.events.lock().take();
		info!(target = "pw.relay.cdp", failed, "browser connection closed");
	}
}

#[async_trait]
impl BrowserBackend for CdpBackend {
	async fn attach(&self, tab: TabId) -> std::result::Result<(), AttachError> {
		let target_id = self
			.target_id(tab)
			.await
			.map_err(|err| AttachError::Other(err.to_string()))?
			.ok_or(AttachError::TabNotFound(tab))?;
		if self.shared.targets.lock().session_of(tab).is_some() {
			return Ok(());
		}

		let result = self
			.shared
			.call(None, "Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }))
			.await
			.map_err(|err| classify_attach_error(tab, err))?;
		let session = result
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| AttachError::Other("Target.attachToTarget returned no sessionId".into()))?;

		self.shared.targets.lock().bind_session(tab, session);
		debug!(target = "pw.relay.cdp", %tab, session, "attached");
		Ok(())
	}

	async fn detach(&self, tab: TabId) -> std::result::Result<(), BackendError> {
		let Some(session) = self.shared.targets.lock().take_session(tab) else {
			return Ok(());
		};
		match self
			.shared
			.call(None, "Target.detachFromTarget", json!({ "sessionId": session }))
			.await
		{
			Ok(_) => Ok(()),
			Err(BackendError::Protocol(message)) => {
				debug!(target = "pw.relay.cdp", %tab, %message, "session already gone");
				Ok(())
			}
			Err(err) => Err(err),
		}
	}

	async fn send_command(&self, tab: TabId, method: &str, params: Value) -> std::result::Result<Value, BackendError> {
		let session = self.shared.targets.lock().session_of(tab).ok_or(BackendError::NotAttached(tab))?;
		self.shared.call(Some(&session), method, params).await
	}

	async fn list_tabs(&self) -> std::result::Result<Vec<TabInfo>, BackendError> {
		let pages: Vec<_> = self.targets().await?.into_iter().filter(|info| info.kind == "page").collect();
		let mut targets = self.shared.targets.lock();
		Ok(pages
			.into_iter()
			.enumerate()
			.map(|(index, info)| TabInfo {
				id: targets.tab_for(&info.target_id),
				title: info.title,
				url: info.url,
				index: index as u32,
			})
			.collect())
	}

	async fn tab(&self, tab: TabId) -> std::result::Result<Option<TabInfo>, BackendError> {
		Ok(self.list_tabs().await?.into_iter().find(|info| info.id == tab))
	}

	async fn create_tab(&self, url: Option<&str>) -> std::result::Result<TabInfo, BackendError> {
		let url = url.unwrap_or("about:blank");
		let result = self.shared.call(None, "Target.createTarget", json!({ "url": url })).await?;
		let target_id = result
			.get("targetId")
			.and_then(Value::as_str)
			.ok_or_else(|| BackendError::Protocol("Target.createTarget returned no targetId".into()))?;
		let tab = self.shared.targets.lock().tab_for(target_id);

		let tabs = self.list_tabs().await?;
		let index = tabs.len() as u32;
		Ok(tabs.into_iter().find(|info| info.id == tab).unwrap_or_else(|| TabInfo {
			id: tab,
			title: String::new(),
			url: url.to_string(),
			index,
		}))
	}

	async fn activate_tab(&self, tab: TabId) -> std::result::Result<(), BackendError> {
		let target_id = self.require_target(tab).await?;
		self.shared.call(None, "Target.activateTarget", json!({ "targetId": target_id })).await?;
		Ok(())
	}

	async fn close_tab(&self, tab: TabId) -> std::result::Result<(), BackendError> {
		let target_id = self.require_target(tab).await?;
		self.shared.call(None, "Target.closeTarget", json!({ "targetId": target_id })).await?;
		self.shared.targets.lock().forget_target(&target_id);
		Ok(())
	}

	async fn list_extensions(&self) -> std::result::Result<Vec<ExtensionInfo>, BackendError> {
		let mut found: Vec<ExtensionInfo> = Vec::new();
		for info in self.targets().await? {
			if info.kind != "service_worker" && info.kind != "background_page" {
				continue;
			}
			let Some(id) = extension_id(&info.url) else {
				continue;
			};
			if found.iter().any(|known| known.id == id) {
				continue;
			}
			let name = if info.title.is_empty() || info.title.starts_with(EXTENSION_SCHEME) {
				id.to_string()
			} else {
				info.title
			};
			found.push(ExtensionInfo {
				id: id.to_string(),
				name,
				enabled: true,
			});
		}
		Ok(found)
	}
}

fn extension_id(url: &str) -> Option<&str> {
	let rest = url.strip_prefix(EXTENSION_SCHEME)?;
	let id = rest.split('/').next()?;
	(!id.is_empty()).then_some(id)
}

fn error_text(error: &Value) -> String {
	let message = error.get("message").and_then(Value::as_str);
	let data = error.get("data").and_then(Value::as_str);
	match (message, data) {
		(Some(message), Some(data)) => format!("{message}: {data}"),
		(Some(message), None) => message.to_string(),
		_ => error.to_string(),
	}
}

fn link_closed() -> BackendError {
	BackendError::Unavailable("browser connection closed".into())
}

/// Maps a refused `Target.attachToTarget` onto the relay's attach failure kinds.
fn classify_attach_error(tab: TabId, err: BackendError) -> AttachError {
	let message = match err {
		BackendError::Protocol(message) => message,
		BackendError::TabNotFound(tab) => return AttachError::TabNotFound(tab),
		other => return AttachError::Other(other.to_string()),
	};

	let lower = message.to_ascii_lowercase();
	if lower.contains("no target with given id") {
		AttachError::TabNotFound(tab)
	} else if lower.contains("already attached") || lower.contains("another debugger") {
		AttachError::AlreadyDebugged(message)
	} else if lower.contains(EXTENSION_SCHEME) || lower.contains("cannot access") {
		AttachError::Blocked(message)
	} else {
		AttachError::Other(message)
	}
}

#[cfg(test)]
mod tests;
