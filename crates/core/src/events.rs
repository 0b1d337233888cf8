//! Routing of passive protocol events into connection state.
//!
//! Events for tabs no slot holds are dropped. Console capture honours the
//! holding slot's stealth flag; network capture does not.

use std::time::{SystemTime, UNIX_EPOCH};

use pw_relay_protocol::{ConsoleEntry, RequestMeta, ResponseMeta};
use serde_json::Value;
use tracing::{debug, trace};

use crate::backend::TabId;
use crate::state::RelayState;

/// Applies one protocol event observed on `tab`.
pub fn apply_event(state: &mut RelayState, tab: TabId, method: &str, params: &Value) {
	let Some(key) = state.registry.holder_of(tab).cloned() else {
		trace!(target = "pw.relay.telemetry", %tab, method, "event for unheld tab dropped");
		return;
	};
	let Some(slot) = state.slots.get_mut(&key) else {
		return;
	};
	let stealth = slot.stealth();

	match method {
		"Page.frameNavigated" => {
			let Some(frame) = params.get("frame") else {
				return;
			};
			if frame.get("parentId").is_some_and(|p| !p.is_null()) {
				return;
			}
			if let Some(frame_id) = frame.get("id").and_then(Value::as_str) {
				slot.contexts_mut().set_main_frame(frame_id);
			}
			state.telemetry.clear(tab);
			let url = frame.get("url").and_then(Value::as_str).unwrap_or_default();
			debug!(target = "pw.relay.telemetry", %tab, url, "main frame navigated; buffers cleared");
		}
		"Runtime.executionContextCreated" => {
			if let Some(ext) = slot.contexts_mut().on_created(params) {
				debug!(target = "pw.relay.telemetry", %tab, extension = %ext.extension_id, name = %ext.name, "extension context observed");
				state.known_extensions.insert(ext.extension_id, ext.name);
			}
		}
		"Runtime.executionContextDestroyed" => slot.contexts_mut().on_destroyed(params),
		"Runtime.consoleAPICalled" if !stealth => state.telemetry.record_console(tab, console_api_entry(params)),
		"Runtime.exceptionThrown" if !stealth => state.telemetry.record_console(tab, exception_entry(params)),
		"Log.entryAdded" if !stealth => {
			if let Some(entry) = log_entry(params) {
				state.telemetry.record_console(tab, entry);
			}
		}
		"Network.requestWillBeSent" => {
			if let Some((request_id, meta)) = request_started(params) {
				state.telemetry.record_request_start(request_id, meta);
			}
		}
		"Network.responseReceived" => {
			if let Some(request_id) = request_id(params) {
				state.telemetry.record_response(tab, request_id, response_meta(params));
			}
		}
		"Network.loadingFailed" => {
			if let Some(request_id) = request_id(params) {
				let failure = ResponseMeta {
					failed: true,
					error_text: params.get("errorText").and_then(Value::as_str).map(str::to_string),
					..Default::default()
				};
				state.telemetry.record_response(tab, request_id, failure);
			}
		}
		_ => {}
	}
}

fn console_api_entry(params: &Value) -> ConsoleEntry {
	let kind = params.get("type").and_then(Value::as_str).unwrap_or("log");
	let text = params
		.get("args")
		.and_then(Value::as_array)
		.map(|args| args.iter().map(remote_object_text).collect::<Vec<_>>().join(" "))
		.unwrap_or_default();
	let mut entry = ConsoleEntry::new(kind, text, timestamp_ms(params.get("timestamp")));

	let top_frame = params.pointer("/stackTrace/callFrames/0");
	entry.url = top_frame
		.and_then(|f| f.get("url"))
		.and_then(Value::as_str)
		.filter(|u| !u.is_empty())
		.map(str::to_string);
	entry.line_number = top_frame.and_then(|f| f.get("lineNumber")).and_then(Value::as_u64).map(|n| n as u32);
	entry
}

fn exception_entry(params: &Value) -> ConsoleEntry {
	let details = params.get("exceptionDetails").unwrap_or(&Value::Null);
	let text = details
		.pointer("/exception/description")
		.and_then(Value::as_str)
		.or_else(|| details.get("text").and_then(Value::as_str))
		.unwrap_or("Uncaught exception");
	let mut entry = ConsoleEntry::new("error", text, timestamp_ms(params.get("timestamp")));
	entry.url = details.get("url").and_then(Value::as_str).map(str::to_string);
	entry.line_number = details.get("lineNumber").and_then(Value::as_u64).map(|n| n as u32);
	entry
}

fn log_entry(params: &Value) -> Option<ConsoleEntry> {
	let raw = params.get("entry")?;
	let level = raw.get("level").and_then(Value::as_str).unwrap_or("info");
	let text = raw.get("text").and_then(Value::as_str).unwrap_or_default();
	let mut entry = ConsoleEntry::new(level, text, timestamp_ms(raw.get("timestamp")));
	entry.url = raw.get("url").and_then(Value::as_str).map(str::to_string);
	entry.line_number = raw.get("lineNumber").and_then(Value::as_u64).map(|n| n as u32);
	Some(entry)
}

fn request_started(params: &Value) -> Option<(&str, RequestMeta)> {
	let request_id = request_id(params)?;
	let request = params.get("request")?;
	// `wallTime` is seconds since the epoch; `timestamp` is monotonic.
	let timestamp = params
		.get("wallTime")
		.and_then(Value::as_f64)
		.map(|secs| secs * 1000.0)
		.unwrap_or_else(now_ms);
	let meta = RequestMeta {
		url: request.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
		method: request.get("method").and_then(Value::as_str).unwrap_or("GET").to_string(),
		resource_type: params.get("type").and_then(Value::as_str).map(str::to_string),
		timestamp,
	};
	Some((request_id, meta))
}

fn response_meta(params: &Value) -> ResponseMeta {
	let response = params.get("response").unwrap_or(&Value::Null);
	let text = |field: &str| response.get(field).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string);
	ResponseMeta {
		status: response.get("status").and_then(Value::as_f64).map(|s| s as u16),
		status_text: text("statusText"),
		mime_type: text("mimeType"),
		..Default::default()
	}
}

fn request_id(params: &Value) -> Option<&str> {
	params.get("requestId").and_then(Value::as_str)
}

/// Renders one `Runtime.RemoteObject` argument.
fn remote_object_text(arg: &Value) -> String {
	if let Some(value) = arg.get("value") {
		return match value {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		};
	}
	["description", "unserializableValue", "type"]
		.iter()
		.find_map(|field| arg.get(*field).and_then(Value::as_str))
		.unwrap_or_default()
		.to_string()
}

fn timestamp_ms(raw: Option<&Value>) -> f64 {
	raw.and_then(Value::as_f64).unwrap_or_else(now_ms)
}

fn now_ms() -> f64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64() * 1000.0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::options::RelayOptions;
	use crate::registry::SlotKey;

	fn state_with(tab: TabId, stealth: bool) -> RelayState {
		let mut state = RelayState::new(&RelayOptions::default());
		state.registry.bind(SlotKey::Direct, tab).unwrap();
		state.slot_mut(&SlotKey::Direct).begin_attach(stealth, false);
		state
	}

	fn console_log(text: &str) -> Value {
		json!({
			"type": "log",
			"args": [{ "type": "string", "value": text }],
			"timestamp": 1700000000000.0,
			"stackTrace": { "callFrames": [{ "url": "https://a.test/app.js", "lineNumber": 12 }] }
		})
	}

	#[test]
	fn console_api_call_is_recorded() {
		let mut state = state_with(TabId(3), false);
		apply_event(&mut state, TabId(3), "Runtime.consoleAPICalled", &console_log("hi"));
		let entries = state.telemetry.console(TabId(3));
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].kind, "log");
		assert_eq!(entries[0].text, "hi");
		assert_eq!(entries[0].url.as_deref(), Some("https://a.test/app.js"));
		assert_eq!(entries[0].line_number, Some(12));
	}

	#[test]
	fn console_arguments_join_with_spaces() {
		let mut state = state_with(TabId(1), false);
		let params = json!({
			"type": "warning",
			"args": [
				{ "type": "string", "value": "count" },
				{ "type": "number", "value": 3 },
				{ "type": "object", "description": "Object" },
				{ "type": "number", "unserializableValue": "NaN" }
			]
		});
		apply_event(&mut state, TabId(1), "Runtime.consoleAPICalled", &params);
		assert_eq!(state.telemetry.console(TabId(1))[0].text, "count 3 Object NaN");
	}

	#[test]
	fn stealth_skips_console_but_not_network() {
		let mut state = state_with(TabId(2), true);
		apply_event(&mut state, TabId(2), "Runtime.consoleAPICalled", &console_log("secret"));
		apply_event(
			&mut state,
			TabId(2),
			"Runtime.exceptionThrown",
			&json!({ "exceptionDetails": { "text": "Uncaught" } }),
		);
		apply_event(
			&mut state,
			TabId(2),
			"Network.requestWillBeSent",
			&json!({ "requestId": "r1", "request": { "url": "https://a.test/", "method": "GET" } }),
		);
		apply_event(
			&mut state,
			TabId(2),
			"Network.responseReceived",
			&json!({ "requestId": "r1", "response": { "status": 200, "statusText": "OK", "mimeType": "text/html" } }),
		);
		assert!(state.telemetry.console(TabId(2)).is_empty());
		let network = state.telemetry.network(TabId(2));
		assert_eq!(network.len(), 1);
		assert_eq!(network[0].response.status, Some(200));
		assert_eq!(network[0].response.mime_type.as_deref(), Some("text/html"));
	}

	#[test]
	fn subframe_navigation_keeps_buffers() {
		let mut state = state_with(TabId(4), false);
		apply_event(&mut state, TabId(4), "Runtime.consoleAPICalled", &console_log("kept"));
		apply_event(
			&mut state,
			TabId(4),
			"Page.frameNavigated",
			&json!({ "frame": { "id": "child", "parentId": "F1", "url": "https://ads.test/" } }),
		);
		assert_eq!(state.telemetry.console(TabId(4)).len(), 1);

		apply_event(
			&mut state,
			TabId(4),
			"Page.frameNavigated",
			&json!({ "frame": { "id": "F1", "url": "https://a.test/next" } }),
		);
		assert!(state.telemetry.console(TabId(4)).is_empty());
		assert_eq!(state.slots[&SlotKey::Direct].contexts().main_frame(), Some("F1"));
	}

	#[test]
	fn loading_failure_is_recorded_as_failed() {
		let mut state = state_with(TabId(5), false);
		apply_event(
			&mut state,
			TabId(5),
			"Network.requestWillBeSent",
			&json!({ "requestId": "r9", "wallTime": 1700000000.5, "type": "XHR", "request": { "url": "https://a.test/api", "method": "POST" } }),
		);
		apply_event(
			&mut state,
			TabId(5),
			"Network.loadingFailed",
			&json!({ "requestId": "r9", "errorText": "net::ERR_CONNECTION_REFUSED" }),
		);
		let entry = &state.telemetry.network(TabId(5))[0];
		assert!(entry.response.failed);
		assert_eq!(entry.request.method, "POST");
		assert_eq!(entry.request.resource_type.as_deref(), Some("XHR"));
		assert_eq!(entry.request.timestamp, 1700000000500.0);
	}

	#[test]
	fn extension_contexts_are_remembered() {
		let mut state = state_with(TabId(6), false);
		apply_event(
			&mut state,
			TabId(6),
			"Runtime.executionContextCreated",
			&json!({ "context": { "id": 40, "origin": "chrome-extension://kbfnbcaeplbcioakkpcpgfkobkghlhen", "name": "Grammarly", "auxData": { "isDefault": false } } }),
		);
		assert_eq!(
			state.known_extensions.get("kbfnbcaeplbcioakkpcpgfkobkghlhen").map(String::as_str),
			Some("Grammarly")
		);
	}

	#[test]
	fn events_for_unheld_tabs_are_dropped() {
		let mut state = state_with(TabId(1), false);
		apply_event(&mut state, TabId(99), "Runtime.consoleAPICalled", &console_log("stray"));
		assert!(state.telemetry.tracked_tabs().is_empty());
	}
}
