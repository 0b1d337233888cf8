//! Server transport and CDP backend over real sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pw_relay_runtime::{CdpBackend, RuntimeError, connect_server};
use relay::{BackendEvent, BrowserBackend, TabId};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

#[tokio::test]
async fn server_link_carries_text_frames_and_bearer_token() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (auth_tx, auth_rx) = oneshot::channel();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
			let auth = request
				.headers()
				.get("authorization")
				.and_then(|value| value.to_str().ok())
				.map(str::to_string);
			let _ = auth_tx.send(auth);
			Ok(response)
		};
		let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
		let (mut ws_tx, mut ws_rx) = ws.split();

		ws_tx
			.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"method":"getTabs"}"#.into()))
			.await
			.unwrap();
		let reply = ws_rx.next().await.unwrap().unwrap();
		assert_eq!(reply, Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.into()));
		ws_tx.send(Message::Close(None)).await.unwrap();
	});

	let mut link = connect_server(&format!("ws://{addr}"), Some("s3cret")).await.expect("connect");
	assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer s3cret"));

	let request = link.inbound.recv().await.expect("request frame");
	assert!(request.contains("getTabs"));
	link.outbound.send(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()).unwrap();

	let closed = tokio::time::timeout(Duration::from_secs(2), link.inbound.recv()).await.expect("close should end inbound");
	assert!(closed.is_none());
	server.await.unwrap();
}

#[tokio::test]
async fn server_url_must_be_websocket() {
	let err = connect_server("http://127.0.0.1:1/", None).await.err().expect("rejected");
	assert!(matches!(err, RuntimeError::InvalidEndpoint(_)), "{err}");
}

#[tokio::test]
async fn cdp_backend_talks_to_a_browser_socket() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let browser = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let (mut ws_tx, mut ws_rx) = ws.split();
		let mut seen = Vec::new();

		while let Some(Ok(Message::Text(text))) = ws_rx.next().await {
			let frame: Value = serde_json::from_str(&text).unwrap();
			let method = frame["method"].as_str().unwrap_or_default().to_string();
			let result = match method.as_str() {
				"Target.getTargets" => json!({
					"targetInfos": [{ "targetId": "T1", "type": "page", "title": "Home", "url": "https://example.com/" }]
				}),
				"Target.attachToTarget" => json!({ "sessionId": "S1" }),
				_ => json!({}),
			};
			ws_tx.send(Message::Text(json!({ "id": frame["id"], "result": result }).to_string())).await.unwrap();

			let attached = method == "Target.attachToTarget";
			seen.push(method);
			if attached {
				let event = json!({ "method": "Target.detachedFromTarget", "params": { "sessionId": "S1", "targetId": "T1" } });
				ws_tx.send(Message::Text(event.to_string())).await.unwrap();
				break;
			}
		}
		seen
	});

	let (backend, mut events) = CdpBackend::connect(&format!("ws://{addr}")).await.expect("connect");
	let tabs = backend.list_tabs().await.expect("tabs");
	assert_eq!(tabs.len(), 1);
	assert_eq!(tabs[0].title, "Home");

	backend.attach(tabs[0].id).await.expect("attach");
	let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.expect("event").expect("open");
	assert_eq!(
		event,
		BackendEvent::Detached {
			tab: TabId(1),
			reason: "target_detached".into(),
		}
	);

	let seen = browser.await.unwrap();
	assert_eq!(seen, ["Target.setDiscoverTargets", "Target.getTargets", "Target.attachToTarget"]);
}
