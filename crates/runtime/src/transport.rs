//! WebSocket link to the automation server.
//!
//! The link is reduced to two text channels so the relay connection never
//! sees the socket. Pings are answered by the WebSocket library; a close
//! frame or read error ends `inbound`. Dropping every `outbound` sender
//! flushes what is queued and closes the socket.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, info, warn};

use crate::discovery::validate_ws_url;
use crate::error::{Result, RuntimeError};

/// Text channels of an open server connection.
pub struct ServerLink {
	/// Frames received from the server.
	pub inbound: mpsc::UnboundedReceiver<String>,
	/// Frames to send to the server.
	pub outbound: mpsc::UnboundedSender<String>,
}

/// Opens the server WebSocket, sending `token` as a bearer credential when set.
pub async fn connect_server(url: &str, token: Option<&str>) -> Result<ServerLink> {
	validate_ws_url(url)?;
	let mut request = url.into_client_request()?;
	if let Some(token) = token {
		let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|err| RuntimeError::InvalidToken(err.to_string()))?;
		request.headers_mut().insert(AUTHORIZATION, value);
	}

	let (socket, response) = connect_async(request).await?;
	info!(target = "pw.relay.transport", url, status = %response.status(), "connected to server");
	let (mut sink, mut stream) = socket.split();
	let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

	tokio::spawn(async move {
		while let Some(text) = outbound_rx.recv().await {
			if let Err(err) = sink.send(Message::Text(text)).await {
				warn!(target = "pw.relay.transport", error = %err, "server write failed");
				return;
			}
		}
		debug!(target = "pw.relay.transport", "outbound closed; closing socket");
		let _ = sink.close().await;
	});

	tokio::spawn(async move {
		while let Some(message) = stream.next().await {
			let text = match message {
				Ok(Message::Text(text)) => text,
				Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
					Ok(text) => text,
					Err(_) => {
						warn!(target = "pw.relay.transport", "non-UTF-8 binary frame dropped");
						continue;
					}
				},
				Ok(Message::Close(frame)) => {
					info!(target = "pw.relay.transport", ?frame, "server closed the connection");
					break;
				}
				Ok(_) => continue,
				Err(err) => {
					warn!(target = "pw.relay.transport", error = %err, "server read failed");
					break;
				}
			};
			if inbound_tx.send(text).is_err() {
				break;
			}
		}
	});

	Ok(ServerLink {
		inbound: inbound_rx,
		outbound: outbound_tx,
	})
}
