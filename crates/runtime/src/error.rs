use relay::BackendError;
use thiserror::Error;

/// Failures while reaching the browser or the automation server.
#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("no browser debugging endpoint at {endpoint}: {reason}")]
	Discovery { endpoint: String, reason: String },

	#[error("invalid endpoint {0}: expected a ws:// or wss:// URL")]
	InvalidEndpoint(String),

	#[error("invalid authorization token: {0}")]
	InvalidToken(String),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error(transparent)]
	Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
