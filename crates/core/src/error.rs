use pw_relay_protocol::{ErrorObject, codes};
use serde_json::json;
use thiserror::Error;

use crate::backend::{BackendError, TabId};
use crate::blocking::BlockerIdentity;
use crate::registry::SlotKey;

/// Why an attach was refused by something other than the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockingCause {
	/// DevTools or another automation client owns the tab.
	OtherDebugger,
	/// Injected content from another extension blocks the channel.
	Extension(BlockerIdentity),
}

/// Per-command failure. Always turned into an error response; never ends the connection.
#[derive(Debug, Error)]
pub enum RelayError {
	#[error("unknown method: {0}")]
	UnknownMethod(String),

	#[error("invalid params for {method}: {reason}")]
	InvalidParams { method: String, reason: String },

	#[error("invalid request: {0}")]
	InvalidRequest(String),

	#[error("no tab is attached yet; the tab may be reattaching, retry shortly or select a tab with selectTab")]
	NoTabAttached,

	#[error("tab {tab} is already attached by {holder}")]
	TabAlreadyBound { tab: TabId, holder: SlotKey },

	#[error("{}", blocked_message(.tab, .cause))]
	AttachmentBlocked { tab: TabId, cause: BlockingCause },

	#[error("tab {tab} is gone: {reason}")]
	TabGone { tab: TabId, reason: String },

	#[error("attach to tab {tab} was superseded by a newer request")]
	Superseded { tab: TabId },

	#[error("attach to tab {tab} failed: {reason}")]
	AttachFailed { tab: TabId, reason: String },

	#[error(transparent)]
	Backend(#[from] BackendError),
}

impl RelayError {
	pub fn invalid_params(method: &str, reason: impl std::fmt::Display) -> Self {
		RelayError::InvalidParams {
			method: method.to_string(),
			reason: reason.to_string(),
		}
	}

	/// Wire error code.
	pub fn code(&self) -> i64 {
		match self {
			RelayError::UnknownMethod(_) => codes::METHOD_NOT_FOUND,
			RelayError::InvalidParams { .. } => codes::INVALID_PARAMS,
			RelayError::InvalidRequest(_) => codes::INVALID_REQUEST,
			RelayError::NoTabAttached => codes::NO_TAB_ATTACHED,
			RelayError::TabAlreadyBound { .. } => codes::TAB_ALREADY_BOUND,
			RelayError::AttachmentBlocked { .. } => codes::ATTACHMENT_BLOCKED,
			RelayError::TabGone { .. } => codes::TAB_GONE,
			RelayError::Backend(BackendError::TabNotFound(_)) => codes::TAB_GONE,
			RelayError::Superseded { .. } | RelayError::AttachFailed { .. } | RelayError::Backend(_) => codes::INTERNAL_ERROR,
		}
	}

	pub fn to_error_object(&self) -> ErrorObject {
		let error = ErrorObject::new(self.code(), self.to_string());
		match self {
			RelayError::NoTabAttached | RelayError::Superseded { .. } => error.with_data(json!({ "retryable": true })),
			RelayError::TabAlreadyBound { tab, holder } => error.with_data(json!({
				"tabId": tab,
				"holder": holder.to_string(),
			})),
			RelayError::AttachmentBlocked { tab, cause } => {
				let data = match cause {
					BlockingCause::OtherDebugger => json!({ "tabId": tab, "cause": "otherDebugger" }),
					BlockingCause::Extension(BlockerIdentity::Known(ext)) => {
						json!({ "tabId": tab, "cause": "extension", "extension": ext })
					}
					BlockingCause::Extension(BlockerIdentity::Unknown) => json!({ "tabId": tab, "cause": "extension" }),
				};
				error.with_data(data)
			}
			_ => error,
		}
	}
}

fn blocked_message(tab: &TabId, cause: &BlockingCause) -> String {
	match cause {
		BlockingCause::OtherDebugger => {
			format!("tab {tab} is already being debugged by another client (DevTools or another automation tool); close it and retry")
		}
		BlockingCause::Extension(identity) => match identity.name() {
			Some(name) => format!("debugger access to tab {tab} is blocked by the extension \"{name}\"; disable it for this site and retry"),
			None => format!("debugger access to tab {tab} is blocked by another installed extension; disable extensions that inject into pages and retry"),
		},
	}
}
