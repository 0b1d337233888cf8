//! JSON-RPC error codes and the error object carried by failed responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame was not valid JSON or not a recognizable envelope.
pub const PARSE_ERROR: i64 = -32700;
/// Envelope parsed but is not a usable request.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler registered for the method name.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Handler rejected the request parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Backend or otherwise unclassified failure.
pub const INTERNAL_ERROR: i64 = -32000;
/// Command needs an attached tab and none is attached (retryable).
pub const NO_TAB_ATTACHED: i64 = -32001;
/// Tab is already bound to another tenant on this connection.
pub const TAB_ALREADY_BOUND: i64 = -32002;
/// Another debugging client or extension blocks the attachment.
pub const ATTACHMENT_BLOCKED: i64 = -32003;
/// Target tab is closed or not automatable.
pub const TAB_GONE: i64 = -32004;

/// Error payload of a failed response.
///
/// ```json
/// { "code": -32001, "message": "No tab attached ..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl ErrorObject {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Attaches structured details for programmatic consumers.
	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}

	/// Generic parse failure used when a frame cannot be decoded.
	pub fn parse_error(message: impl Into<String>) -> Self {
		Self::new(PARSE_ERROR, message)
	}
}
