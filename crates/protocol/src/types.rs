//! Payload shapes carried in relay requests, responses and notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptor of a browser tab as reported to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabDescriptor {
	pub id: u64,
	pub title: String,
	pub url: String,
	pub index: u32,
}

/// Entry of `getTabs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabListing {
	#[serde(flatten)]
	pub tab: TabDescriptor,
	pub automatable: bool,
	pub attached: bool,
}

/// One captured console message or uncaught exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
	/// `log`, `warning`, `error`, ... as reported by the page.
	#[serde(rename = "type")]
	pub kind: String,
	pub text: String,
	/// Milliseconds since the Unix epoch.
	pub timestamp: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line_number: Option<u32>,
}

impl ConsoleEntry {
	pub fn new(kind: impl Into<String>, text: impl Into<String>, timestamp: f64) -> Self {
		Self {
			kind: kind.into(),
			text: text.into(),
			timestamp,
			url: None,
			line_number: None,
		}
	}
}

/// Request metadata captured before its response arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
	pub url: String,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_type: Option<String>,
	pub timestamp: f64,
}

/// Response-side metadata merged into a [`NetworkEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status_text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub failed: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_text: Option<String>,
}

/// Completed network exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
	pub request_id: String,
	#[serde(flatten)]
	pub request: RequestMeta,
	#[serde(flatten)]
	pub response: ResponseMeta,
}

/// Reply to the authentication handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResult {
	/// Browser display name.
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	/// Stable identity that survives restarts and upgrades.
	pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectTabParams {
	pub tab_id: u64,
	#[serde(default)]
	pub stealth: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTabParams {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub stealth: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardCommandParams {
	pub method: String,
	#[serde(default)]
	pub params: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitParams {
	#[serde(default)]
	pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthParams {
	pub enabled: bool,
}

/// `connectionStatus` notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusParams {
	#[serde(default)]
	pub connected: bool,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// `authenticated` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedParams {
	pub connection_id: String,
	#[serde(default)]
	pub client_name: Option<String>,
}

/// `tenantDisconnected` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDisconnectedParams {
	pub tenant: String,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn network_entry_flattens_request_and_response() {
		let entry = NetworkEntry {
			request_id: "req-1".to_string(),
			request: RequestMeta {
				url: "https://example.com/api".to_string(),
				method: "GET".to_string(),
				resource_type: Some("Fetch".to_string()),
				timestamp: 1.0,
			},
			response: ResponseMeta {
				status: Some(200),
				..Default::default()
			},
		};
		let value = serde_json::to_value(&entry).unwrap();
		assert_eq!(value["requestId"], "req-1");
		assert_eq!(value["url"], "https://example.com/api");
		assert_eq!(value["status"], 200);
		assert!(value.get("failed").is_none());
	}

	#[test]
	fn console_entry_uses_type_key() {
		let value = serde_json::to_value(ConsoleEntry::new("log", "hi", 5.0)).unwrap();
		assert_eq!(value, json!({"type": "log", "text": "hi", "timestamp": 5.0}));
	}

	#[test]
	fn tab_listing_flattens_descriptor() {
		let listing = TabListing {
			tab: TabDescriptor {
				id: 3,
				title: "Example".to_string(),
				url: "https://example.com/".to_string(),
				index: 0,
			},
			automatable: true,
			attached: false,
		};
		let value = serde_json::to_value(&listing).unwrap();
		assert_eq!(value["id"], 3);
		assert_eq!(value["automatable"], true);
	}

	#[test]
	fn select_tab_params_accept_camel_case() {
		let params: SelectTabParams = serde_json::from_value(json!({"tabId": 9, "stealth": true})).unwrap();
		assert_eq!(params.tab_id, 9);
		assert_eq!(params.stealth, Some(true));
	}
}
