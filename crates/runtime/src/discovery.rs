//! Finding the browser-level DevTools WebSocket.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, RuntimeError};

const PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// `/json/version` response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpVersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser", default)]
	pub browser: Option<String>,
}

impl CdpVersionInfo {
	/// Product name without the version, e.g. `"Chrome"` for `"Chrome/126.0.6478.126"`.
	pub fn product(&self) -> Option<&str> {
		let browser = self.browser.as_deref()?;
		let name = browser.split('/').next().unwrap_or(browser).trim();
		if name.is_empty() {
			return None;
		}
		Some(name.strip_prefix("Headless").unwrap_or(name))
	}
}

/// Where the browser's debugging endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEndpoint {
	/// Local remote-debugging port; resolved through `/json/version`.
	Port(u16),
	/// Browser WebSocket URL used as-is.
	WebSocket(String),
}

impl BrowserEndpoint {
	/// Resolves to a browser WebSocket URL, probing the port when needed.
	pub async fn resolve(&self) -> Result<String> {
		match self {
			BrowserEndpoint::WebSocket(url) => {
				validate_ws_url(url)?;
				Ok(url.clone())
			}
			BrowserEndpoint::Port(port) => Ok(fetch_version(*port).await?.web_socket_debugger_url),
		}
	}
}

/// Reads `/json/version` from the first loopback address that answers on `port`.
pub async fn fetch_version(port: u16) -> Result<CdpVersionInfo> {
	let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
	let mut last_error = "no response".to_string();

	for host in ["127.0.0.1", "localhost", "[::1]"] {
		let url = format!("http://{host}:{port}/json/version");
		let response = match client.get(&url).send().await {
			Ok(response) => response,
			Err(err) => {
				debug!(target = "pw.relay.cdp", %url, error = %err, "probe failed");
				last_error = err.to_string();
				continue;
			}
		};

		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}

		return response.json().await.map_err(|err| RuntimeError::Discovery {
			endpoint: url,
			reason: format!("unreadable version info: {err}"),
		});
	}

	Err(RuntimeError::Discovery {
		endpoint: format!("port {port}"),
		reason: last_error,
	})
}

pub(crate) fn validate_ws_url(raw: &str) -> Result<url::Url> {
	let parsed = url::Url::parse(raw).map_err(|_| RuntimeError::InvalidEndpoint(raw.to_string()))?;
	match parsed.scheme() {
		"ws" | "wss" => Ok(parsed),
		_ => Err(RuntimeError::InvalidEndpoint(raw.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	use super::*;

	async fn serve_once(status: &'static str, body: &'static str) -> u16 {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let mut buf = [0u8; 1024];
			let _ = stream.read(&mut buf).await;
			let reply = format!(
				"HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
				body.len()
			);
			stream.write_all(reply.as_bytes()).await.unwrap();
		});
		port
	}

	#[tokio::test]
	async fn reads_debugger_url_from_version_endpoint() {
		let port = serve_once(
			"200 OK",
			r#"{"Browser":"Chrome/126.0.6478.126","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#,
		)
		.await;

		let info = fetch_version(port).await.expect("version info");
		assert_eq!(info.web_socket_debugger_url, "ws://127.0.0.1:9222/devtools/browser/abc");
		assert_eq!(info.product(), Some("Chrome"));
	}

	#[tokio::test]
	async fn unreachable_port_is_a_discovery_error() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let err = fetch_version(port).await.expect_err("nothing listening");
		assert!(matches!(err, RuntimeError::Discovery { .. }), "{err}");
	}

	#[test]
	fn headless_prefix_is_dropped() {
		let info = CdpVersionInfo {
			web_socket_debugger_url: String::new(),
			browser: Some("HeadlessChrome/126.0".into()),
		};
		assert_eq!(info.product(), Some("Chrome"));
	}

	#[tokio::test]
	async fn websocket_endpoint_must_use_ws_scheme() {
		let ok = BrowserEndpoint::WebSocket("ws://127.0.0.1:9222/devtools/browser/x".into());
		assert!(ok.resolve().await.is_ok());

		let bad = BrowserEndpoint::WebSocket("http://127.0.0.1:9222".into());
		assert!(matches!(bad.resolve().await, Err(RuntimeError::InvalidEndpoint(_))));
	}
}
