//! Execution-context bookkeeping for an attachment.
//!
//! A page has one default context per frame plus isolated worlds injected by
//! extensions. Automation evaluates in the top-level page context, so its id
//! is tracked from `Runtime.executionContext*` events. The id survives
//! `executionContextsCleared` as a fallback; only destruction of that exact
//! context, a newer main context, or [`ExecutionContexts::reset`] replace it.

use serde_json::Value;

const EXTENSION_ORIGIN_PREFIX: &str = "chrome-extension://";

/// Extension whose content script created an execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionContext {
	pub extension_id: String,
	pub name: String,
}

#[derive(Debug, Default, Clone)]
pub struct ExecutionContexts {
	main: Option<i64>,
	main_frame: Option<String>,
}

impl ExecutionContexts {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current main-context id, possibly a retained fallback.
	pub fn main(&self) -> Option<i64> {
		self.main
	}

	pub fn main_frame(&self) -> Option<&str> {
		self.main_frame.as_deref()
	}

	/// Records the top-level frame after a main-frame navigation.
	pub fn set_main_frame(&mut self, frame_id: impl Into<String>) {
		self.main_frame = Some(frame_id.into());
	}

	/// Handles `Runtime.executionContextCreated`.
	///
	/// Returns the extension behind the context when it is an injected one.
	pub fn on_created(&mut self, params: &Value) -> Option<ExtensionContext> {
		let context = params.get("context")?;
		let id = context.get("id").and_then(Value::as_i64)?;
		let origin = context.get("origin").and_then(Value::as_str).unwrap_or_default();

		if let Some(extension_id) = origin.strip_prefix(EXTENSION_ORIGIN_PREFIX) {
			let extension_id = extension_id.trim_end_matches('/').to_string();
			let name = context.get("name").and_then(Value::as_str).unwrap_or_default();
			let ext = ExtensionContext {
				name: if name.is_empty() { extension_id.clone() } else { name.to_string() },
				extension_id,
			};
			return Some(ext);
		}

		let aux = context.get("auxData");
		let is_default = aux.and_then(|a| a.get("isDefault")).and_then(Value::as_bool).unwrap_or(false);
		if !is_default {
			return None;
		}

		let frame_id = aux.and_then(|a| a.get("frameId")).and_then(Value::as_str);
		let is_main_frame = match (&self.main_frame, frame_id) {
			(Some(main), Some(frame)) => main == frame,
			_ => true,
		};
		if is_main_frame {
			self.main = Some(id);
			if self.main_frame.is_none() {
				self.main_frame = frame_id.map(str::to_string);
			}
		}
		None
	}

	/// Handles `Runtime.executionContextDestroyed`.
	pub fn on_destroyed(&mut self, params: &Value) {
		let Some(id) = params.get("executionContextId").and_then(Value::as_i64) else {
			return;
		};
		if self.main == Some(id) {
			self.main = None;
		}
	}

	/// Forgets everything; used when the attachment is released.
	pub fn reset(&mut self) {
		*self = Self::default();
	}
}
