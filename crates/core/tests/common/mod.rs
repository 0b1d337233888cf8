#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use relay::fake::{FakeBrowserBuilder, FakeBrowserController};
use relay::{Connection, ConnectionExit, RelayContext, RelayOptions, RetryPolicy};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A running connection over a fake browser, driven through raw frames.
pub struct Harness {
	pub controller: FakeBrowserController,
	pub ctx: Arc<RelayContext>,
	inbound: Option<mpsc::UnboundedSender<String>>,
	outbound: mpsc::UnboundedReceiver<String>,
	task: JoinHandle<ConnectionExit>,
}

pub fn options() -> RelayOptions {
	RelayOptions::new("Chrome", "client-1234").with_retry(RetryPolicy::fast())
}

pub fn tabs() -> FakeBrowserBuilder {
	FakeBrowserBuilder::new()
		.titled_tab(3, "Example", "https://example.com/")
		.tab(5, "https://example.com/app")
		.tab(7, "https://example.com/other")
}

impl Harness {
	pub fn start(builder: FakeBrowserBuilder) -> Self {
		Self::start_with(builder, options())
	}

	pub fn start_with(builder: FakeBrowserBuilder, options: RelayOptions) -> Self {
		let (browser, controller, events) = builder.build();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let connection = Connection::new(browser, options, outbound_tx);
		let ctx = connection.context();
		let task = tokio::spawn(connection.run(inbound_rx, events));
		Self {
			controller,
			ctx,
			inbound: Some(inbound_tx),
			outbound: outbound_rx,
			task,
		}
	}

	pub fn send_raw(&self, text: &str) {
		self.inbound
			.as_ref()
			.expect("inbound open")
			.send(text.to_string())
			.expect("connection should be running");
	}

	pub fn send(&self, frame: Value) {
		self.send_raw(&frame.to_string());
	}

	pub fn notify(&self, method: &str, params: Value) {
		self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params }));
	}

	pub async fn recv(&mut self) -> Value {
		let text = tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
			.await
			.expect("response should arrive in time")
			.expect("outbound channel open");
		serde_json::from_str(&text).expect("response should be JSON")
	}

	/// Sends a request and waits for the next response.
	pub async fn request(&mut self, id: Value, method: &str, params: Value) -> Value {
		self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }));
		self.recv().await
	}

	/// Like [`Harness::request`] but asserts success and returns `result`.
	pub async fn call(&mut self, id: Value, method: &str, params: Value) -> Value {
		let response = self.request(id, method, params).await;
		assert!(response.get("error").is_none(), "{method} failed: {response}");
		response["result"].clone()
	}

	/// Closes the inbound stream and waits for the connection to finish.
	pub async fn close(mut self) -> ConnectionExit {
		self.inbound.take();
		self.join().await
	}

	pub async fn join(self) -> ConnectionExit {
		tokio::time::timeout(RECV_TIMEOUT, self.task)
			.await
			.expect("connection should stop in time")
			.expect("connection task should not panic")
	}
}

/// Lets the connection loop drain queued events and spawned work.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(25)).await;
}
