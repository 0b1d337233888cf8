use std::time::Duration;

use super::*;

const EXTENSION: &str = "aaaabbbbccccddddeeeeffffgggghhhh";

/// In-process browser answering every command through `respond`.
struct ScriptedBrowser {
	backend: CdpBackend,
	events: mpsc::UnboundedReceiver<BackendEvent>,
	inbound: mpsc::UnboundedSender<String>,
	sent: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedBrowser {
	fn start() -> Self {
		let targets = Arc::new(Mutex::new(vec![
			target("A", "page", "Example", "https://example.com/"),
			target("B", "page", "", "https://example.org/"),
			target("W", "service_worker", "Grammarly", &format!("chrome-extension://{EXTENSION}/sw.js")),
			target("F", "iframe", "", "https://ads.test/"),
			target("LOCKED", "page", "Locked", "https://locked.test/"),
		]));
		Self::with_responder(move |method, params| respond(&targets, method, params))
	}

	fn with_responder(respond: impl Fn(&str, &Value) -> std::result::Result<Value, String> + Send + 'static) -> Self {
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
		let (backend, events) = CdpBackend::from_channels(outbound_tx, inbound_rx);
		let sent = Arc::new(Mutex::new(Vec::new()));

		let log = Arc::clone(&sent);
		let replies = inbound_tx.clone();
		tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				let frame: Value = serde_json::from_str(&text).expect("backend sends JSON");
				log.lock().push(frame.clone());
				let method = frame["method"].as_str().unwrap_or_default();
				let reply = match respond(method, &frame["params"]) {
					Ok(result) => json!({ "id": frame["id"], "result": result }),
					Err(message) => json!({ "id": frame["id"], "error": { "code": -32000, "message": message } }),
				};
				if replies.send(reply.to_string()).is_err() {
					break;
				}
			}
		});

		Self {
			backend,
			events,
			inbound: inbound_tx,
			sent,
		}
	}

	fn inject(&self, message: Value) {
		self.inbound.send(message.to_string()).expect("reader running");
	}

	async fn next_event(&mut self) -> BackendEvent {
		tokio::time::timeout(Duration::from_secs(1), self.events.recv())
			.await
			.expect("event should arrive")
			.expect("event stream open")
	}

	fn sent(&self, method: &str) -> Vec<Value> {
		self.sent.lock().iter().filter(|frame| frame["method"] == method).cloned().collect()
	}
}

fn target(id: &str, kind: &str, title: &str, url: &str) -> Value {
	json!({ "targetId": id, "type": kind, "title": title, "url": url, "attached": false })
}

fn respond(targets: &Mutex<Vec<Value>>, method: &str, params: &Value) -> std::result::Result<Value, String> {
	match method {
		"Target.getTargets" => Ok(json!({ "targetInfos": targets.lock().clone() })),
		"Target.attachToTarget" => match params["targetId"].as_str() {
			Some("LOCKED") => Err("Another debugger is already attached to the tab".into()),
			Some(id) => Ok(json!({ "sessionId": format!("session-{id}") })),
			None => Err("missing targetId".into()),
		},
		"Target.createTarget" => {
			let url = params["url"].as_str().unwrap_or("about:blank");
			targets.lock().push(target("C", "page", "", url));
			Ok(json!({ "targetId": "C" }))
		}
		"Page.crash" => Err("Not allowed".into()),
		_ => Ok(json!({})),
	}
}

#[tokio::test]
async fn tabs_are_page_targets_with_stable_ids() {
	let browser = ScriptedBrowser::start();
	let tabs = browser.backend.list_tabs().await.expect("tabs");

	let urls: Vec<_> = tabs.iter().map(|tab| tab.url.as_str()).collect();
	assert_eq!(urls, ["https://example.com/", "https://example.org/", "https://locked.test/"]);
	assert_eq!(tabs[0].title, "Example");
	assert_eq!(tabs[1].index, 1);

	let again = browser.backend.list_tabs().await.expect("tabs");
	let ids: Vec<_> = again.iter().map(|tab| tab.id).collect();
	assert_eq!(ids, tabs.iter().map(|tab| tab.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn attach_uses_flat_sessions_and_routes_commands() {
	let browser = ScriptedBrowser::start();
	let tab = browser.backend.list_tabs().await.expect("tabs")[0].id;

	browser.backend.attach(tab).await.expect("attach");
	let attaches = browser.sent("Target.attachToTarget");
	let attach = &attaches[0];
	assert_eq!(attach["params"]["targetId"], "A");
	assert_eq!(attach["params"]["flatten"], true);

	browser
		.backend
		.send_command(tab, "Runtime.evaluate", json!({ "expression": "1" }))
		.await
		.expect("command");
	assert_eq!(browser.sent("Runtime.evaluate")[0]["sessionId"], "session-A");

	let err = browser.backend.send_command(tab, "Page.crash", json!({})).await.unwrap_err();
	assert_eq!(err, BackendError::Protocol("Not allowed".into()));
}

#[tokio::test]
async fn attaching_an_unlisted_tab_refreshes_targets_first() {
	let browser = ScriptedBrowser::start();
	browser.backend.attach(TabId(1)).await.expect("first page target gets id 1");
	assert_eq!(browser.sent("Target.getTargets").len(), 1);
	assert_eq!(browser.sent("Target.attachToTarget")[0]["params"]["targetId"], "A");
}

#[tokio::test]
async fn commands_need_an_attachment() {
	let browser = ScriptedBrowser::start();
	let err = browser.backend.send_command(TabId(1), "Page.reload", json!({})).await.unwrap_err();
	assert_eq!(err, BackendError::NotAttached(TabId(1)));
}

#[tokio::test]
async fn session_events_become_protocol_events() {
	let mut browser = ScriptedBrowser::start();
	browser.backend.attach(TabId(1)).await.expect("attach");

	browser.inject(json!({ "method": "Page.loadEventFired", "params": {}, "sessionId": "session-unknown" }));
	browser.inject(json!({
		"method": "Runtime.consoleAPICalled",
		"params": { "type": "log", "args": [] },
		"sessionId": "session-A",
	}));

	match browser.next_event().await {
		BackendEvent::Protocol { tab, method, params } => {
			assert_eq!(tab, TabId(1));
			assert_eq!(method, "Runtime.consoleAPICalled");
			assert_eq!(params["type"], "log");
		}
		other => panic!("unexpected event {other:?}"),
	}
}

#[tokio::test]
async fn unsolicited_detach_is_reported() {
	let mut browser = ScriptedBrowser::start();
	browser.backend.attach(TabId(1)).await.expect("attach");

	browser.inject(json!({
		"method": "Target.detachedFromTarget",
		"params": { "sessionId": "session-A", "targetId": "A" },
	}));

	assert_eq!(
		browser.next_event().await,
		BackendEvent::Detached {
			tab: TabId(1),
			reason: "target_detached".into(),
		}
	);
	let err = browser.backend.send_command(TabId(1), "Page.reload", json!({})).await.unwrap_err();
	assert_eq!(err, BackendError::NotAttached(TabId(1)));
}

#[tokio::test]
async fn requested_detach_is_silent() {
	let mut browser = ScriptedBrowser::start();
	browser.backend.attach(TabId(1)).await.expect("attach A");
	browser.backend.attach(TabId(2)).await.expect("attach B");

	browser.backend.detach(TabId(1)).await.expect("detach");
	assert_eq!(browser.sent("Target.detachFromTarget")[0]["params"]["sessionId"], "session-A");

	browser.inject(json!({
		"method": "Target.detachedFromTarget",
		"params": { "sessionId": "session-A", "targetId": "A" },
	}));
	browser.inject(json!({ "method": "Page.loadEventFired", "params": {}, "sessionId": "session-B" }));

	match browser.next_event().await {
		BackendEvent::Protocol { tab, .. } => assert_eq!(tab, TabId(2)),
		other => panic!("unexpected event {other:?}"),
	}

	browser.backend.detach(TabId(1)).await.expect("second detach is a no-op");
	assert_eq!(browser.sent("Target.detachFromTarget").len(), 1);
}

#[tokio::test]
async fn destroyed_target_ends_attachment() {
	let mut browser = ScriptedBrowser::start();
	browser.backend.attach(TabId(1)).await.expect("attach");

	browser.inject(json!({ "method": "Target.targetDestroyed", "params": { "targetId": "A" } }));

	assert_eq!(
		browser.next_event().await,
		BackendEvent::Detached {
			tab: TabId(1),
			reason: "target_closed".into(),
		}
	);
}

#[tokio::test]
async fn refused_attach_is_classified() {
	let browser = ScriptedBrowser::start();
	let tabs = browser.backend.list_tabs().await.expect("tabs");
	let locked = tabs.iter().find(|tab| tab.url == "https://locked.test/").expect("locked tab").id;

	let err = browser.backend.attach(locked).await.unwrap_err();
	assert!(matches!(err, AttachError::AlreadyDebugged(_)), "{err:?}");

	let err = browser.backend.attach(TabId(99)).await.unwrap_err();
	assert_eq!(err, AttachError::TabNotFound(TabId(99)));
}

#[test]
fn attach_error_text_maps_to_kinds() {
	let tab = TabId(4);
	let classify = |text: &str| classify_attach_error(tab, BackendError::Protocol(text.into()));

	assert_eq!(classify("No target with given id found"), AttachError::TabNotFound(tab));
	assert!(matches!(
		classify("Cannot access a chrome-extension:// URL of different extension"),
		AttachError::Blocked(_)
	));
	assert!(matches!(classify("Cannot access contents of the page"), AttachError::Blocked(_)));
	assert!(matches!(classify("Target closed"), AttachError::Other(_)));
	assert!(matches!(
		classify_attach_error(tab, BackendError::Unavailable("gone".into())),
		AttachError::Other(_)
	));
}

#[tokio::test]
async fn extensions_come_from_extension_workers() {
	let browser = ScriptedBrowser::start();
	let extensions = browser.backend.list_extensions().await.expect("extensions");
	assert_eq!(
		extensions,
		vec![ExtensionInfo {
			id: EXTENSION.into(),
			name: "Grammarly".into(),
			enabled: true,
		}]
	);
}

#[tokio::test]
async fn created_tab_gets_a_fresh_id() {
	let browser = ScriptedBrowser::start();
	browser.backend.list_tabs().await.expect("tabs");

	let created = browser.backend.create_tab(Some("https://new.test/")).await.expect("create");
	assert_eq!(created.id, TabId(4));
	assert_eq!(created.url, "https://new.test/");
	assert_eq!(browser.sent("Target.createTarget")[0]["params"]["url"], "https://new.test/");
}

#[tokio::test]
async fn closed_link_fails_calls_and_ends_events() {
	let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel::<String>();
	let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
	let (backend, mut events) = CdpBackend::from_channels(outbound_tx, inbound_rx);

	let pending = tokio::spawn({
		let backend = backend.clone();
		async move { backend.list_tabs().await }
	});
	tokio::task::yield_now().await;
	drop(inbound_tx);

	let err = pending.await.expect("task").unwrap_err();
	assert!(matches!(err, BackendError::Unavailable(_)), "{err:?}");
	assert!(events.recv().await.is_none());

	let err = backend.activate_tab(TabId(1)).await.unwrap_err();
	assert!(matches!(err, BackendError::Unavailable(_)), "{err:?}");
}
