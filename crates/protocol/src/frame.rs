//! Frame codec for the relay's JSON-RPC 2.0 envelopes.
//!
//! Inbound frames are classified by shape:
//! - `method` + non-null `id` is a [`Request`]
//! - `method` without `id` is a [`Notification`]
//! - `id` + `result`/`error` is a [`Response`] (the relay never issues requests,
//!   so these are only logged by the caller)
//!
//! Outbound responses always echo the originating id verbatim. A success
//! response whose result was omitted is written with an empty object so the
//! peer sees a uniformly shaped envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codes::ErrorObject;

/// Protocol version string written on every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier as received on the wire.
///
/// Numeric and string ids are kept distinct because the id's type selects the
/// addressing mode (see [`crate::mode::resolve_mode`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(serde_json::Number),
	String(String),
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RequestId::Number(n) => write!(f, "{n}"),
			RequestId::String(s) => write!(f, "{s}"),
		}
	}
}

impl From<u64> for RequestId {
	fn from(value: u64) -> Self {
		RequestId::Number(value.into())
	}
}

impl From<&str> for RequestId {
	fn from(value: &str) -> Self {
		RequestId::String(value.to_string())
	}
}

/// Inbound command from the remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub id: RequestId,
	pub method: String,
	/// Always an object or other JSON value; missing/null params decode as `{}`.
	pub params: Value,
}

/// Inbound fire-and-forget message (no id).
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
	pub method: String,
	pub params: Value,
}

/// Response envelope, used both for outbound replies and for the rare inbound
/// response the peer may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	/// `None` only for replies to frames whose id could not be recovered.
	pub id: Option<RequestId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorObject>,
}

impl Response {
	/// Success response; `None` results are written as `{}`.
	pub fn success(id: RequestId, result: Option<Value>) -> Self {
		Self {
			id: Some(id),
			result: Some(result.unwrap_or_else(empty_object)),
			error: None,
		}
	}

	/// Failed response keyed to `id` (or `null` when unknown).
	pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
	Request(Request),
	Notification(Notification),
	Response(Response),
}

/// Codec-level failures.
#[derive(Debug, Error)]
pub enum FrameError {
	/// Input is not JSON or not a recognizable envelope.
	#[error("malformed frame: {reason}")]
	Malformed {
		reason: String,
		/// Id salvaged from the frame, when it had a usable one.
		id: Option<RequestId>,
	},
	#[error("failed to encode frame: {0}")]
	Encode(#[from] serde_json::Error),
}

impl FrameError {
	fn malformed(reason: impl Into<String>, id: Option<RequestId>) -> Self {
		FrameError::Malformed { reason: reason.into(), id }
	}

	/// Id to echo in the parse-error reply, if one could be recovered.
	pub fn request_id(&self) -> Option<&RequestId> {
		match self {
			FrameError::Malformed { id, .. } => id.as_ref(),
			FrameError::Encode(_) => None,
		}
	}
}

/// Decodes one raw frame.
pub fn decode(raw: &[u8]) -> Result<InboundFrame, FrameError> {
	let value: Value = serde_json::from_slice(raw).map_err(|e| FrameError::malformed(format!("invalid JSON: {e}"), None))?;
	decode_value(value)
}

/// Classifies an already-parsed JSON value.
pub fn decode_value(value: Value) -> Result<InboundFrame, FrameError> {
	let Value::Object(mut object) = value else {
		return Err(FrameError::malformed("frame is not a JSON object", None));
	};

	let id = match object.remove("id") {
		None | Some(Value::Null) => None,
		Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|_| FrameError::malformed("id must be a number or a string", None))?),
	};

	match object.remove("method") {
		Some(Value::String(method)) => {
			let params = normalize_params(object.remove("params"));
			Ok(match id {
				Some(id) => InboundFrame::Request(Request { id, method, params }),
				None => InboundFrame::Notification(Notification { method, params }),
			})
		}
		Some(_) => Err(FrameError::malformed("method must be a string", id)),
		None => {
			let result = object.remove("result");
			let error = object.remove("error");
			if id.is_none() || (result.is_none() && error.is_none()) {
				return Err(FrameError::malformed("frame has neither a method nor a result/error", id));
			}
			let error = error
				.filter(|e| !e.is_null())
				.map(serde_json::from_value::<ErrorObject>)
				.transpose()
				.map_err(|e| FrameError::malformed(format!("invalid error object: {e}"), id.clone()))?;
			Ok(InboundFrame::Response(Response { id, result, error }))
		}
	}
}

/// Serializes a response envelope.
///
/// A response carrying neither result nor error is written with `result: {}`.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, FrameError> {
	let mut object = Map::new();
	object.insert("jsonrpc".to_string(), Value::String(JSONRPC_VERSION.to_string()));
	object.insert("id".to_string(), serde_json::to_value(&response.id)?);
	match &response.error {
		Some(error) => {
			object.insert("error".to_string(), serde_json::to_value(error)?);
		}
		None => {
			let result = response.result.clone().unwrap_or_else(empty_object);
			object.insert("result".to_string(), result);
		}
	}
	Ok(serde_json::to_vec(&Value::Object(object))?)
}

fn normalize_params(params: Option<Value>) -> Value {
	match params {
		None | Some(Value::Null) => empty_object(),
		Some(value) => value,
	}
}

fn empty_object() -> Value {
	Value::Object(Map::new())
}
