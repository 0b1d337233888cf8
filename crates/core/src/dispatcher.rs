//! Method dispatch for inbound requests.
//!
//! A request is routed by its [`AddressMode`] to a session slot, checked
//! against the attached-tab precondition, and handed to its handler. Every
//! successful result is an object carrying `currentTab`.

use pw_relay_protocol::methods::{self, is_tabless};
use pw_relay_protocol::{
	AddressMode, AuthenticateResult, CreateTabParams, ForwardCommandParams, LimitParams, SelectTabParams, StealthParams, TabDescriptor,
	TabListing,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::attachment::{self, AttachmentPhase};
use crate::backend::{TabId, TabInfo};
use crate::error::RelayError;
use crate::registry::SlotKey;
use crate::scheme::is_automatable;
use crate::state::RelayContext;

/// Methods a control-channel id may carry; none of them touch a session slot.
const CONTROL_METHODS: &[&str] = &[methods::AUTHENTICATE, methods::GET_TABS, methods::RELOAD_SELF, methods::OPEN_TEST_PAGE];

/// Session slot a request addresses; `None` for control requests.
pub fn slot_for(mode: &AddressMode) -> Option<SlotKey> {
	match mode {
		AddressMode::Direct => Some(SlotKey::Direct),
		AddressMode::Proxy { tenant, .. } => Some(SlotKey::tenant(tenant.as_str())),
		AddressMode::ProxyControl => None,
	}
}

/// Runs `method` for a request addressed in `mode`.
pub async fn dispatch(ctx: &RelayContext, mode: &AddressMode, method: &str, params: Value) -> Result<Value, RelayError> {
	let key = slot_for(mode);
	match &key {
		Some(key) => ctx.with_state(|state| {
			state.slot_mut(key);
		}),
		None if !CONTROL_METHODS.contains(&method) => {
			return Err(RelayError::InvalidRequest(format!("{method} cannot be sent on the control channel")));
		}
		None => {}
	}

	let result = match key.as_ref() {
		Some(key) => dispatch_for_slot(ctx, key, method, params).await?,
		None => dispatch_tabless(ctx, method).await?,
	};

	let current = match key.as_ref() {
		Some(key) => ctx.current_tab(key).await,
		None => None,
	};
	Ok(with_current_tab(result, current))
}

async fn dispatch_for_slot(ctx: &RelayContext, key: &SlotKey, method: &str, params: Value) -> Result<Value, RelayError> {
	if !is_tabless(method) && !is_known(method) {
		return Err(RelayError::UnknownMethod(method.to_string()));
	}
	if is_tabless(method) {
		return match method {
			methods::SELECT_TAB => select_tab(ctx, key, parse(method, params)?).await,
			methods::CREATE_TAB => create_tab(ctx, key, parse(method, params)?).await,
			_ => dispatch_tabless(ctx, method).await,
		};
	}

	let tab = require_tab(ctx, key).await?;
	debug!(target = "pw.relay.dispatch", %key, %tab, method, "dispatching");
	match method {
		methods::FORWARD_CDP_COMMAND => forward_command(ctx, key, tab, parse(method, params)?).await,
		methods::GET_CONSOLE_MESSAGES => {
			let LimitParams { limit } = parse(method, params)?;
			let entries = ctx.with_state(|state| state.telemetry.console(tab));
			let total = entries.len();
			Ok(json!({ "messages": tail(entries, limit), "total": total }))
		}
		methods::CLEAR_CONSOLE_MESSAGES => {
			ctx.with_state(|state| state.telemetry.clear_console(tab));
			Ok(json!({ "cleared": true }))
		}
		methods::GET_NETWORK_REQUESTS => {
			let LimitParams { limit } = parse(method, params)?;
			let entries = ctx.with_state(|state| state.telemetry.network(tab));
			let total = entries.len();
			Ok(json!({ "requests": tail(entries, limit), "total": total }))
		}
		methods::CLEAR_NETWORK_REQUESTS => {
			ctx.with_state(|state| state.telemetry.clear_network(tab));
			Ok(json!({ "cleared": true }))
		}
		methods::SET_STEALTH_MODE => {
			let StealthParams { enabled } = parse(method, params)?;
			ctx.with_state(|state| state.slot_mut(key).set_stealth(enabled));
			Ok(json!({ "stealth": enabled }))
		}
		methods::DETACH_TAB => {
			let detached = attachment::detach_slot(ctx, key).await;
			Ok(json!({ "detached": detached }))
		}
		methods::CLOSE_TAB => {
			attachment::detach_slot(ctx, key).await;
			ctx.backend.close_tab(tab).await?;
			Ok(json!({ "closed": tab }))
		}
		_ => Err(RelayError::UnknownMethod(method.to_string())),
	}
}

/// Methods that need no session slot.
async fn dispatch_tabless(ctx: &RelayContext, method: &str) -> Result<Value, RelayError> {
	match method {
		methods::AUTHENTICATE => {
			let result = AuthenticateResult {
				name: ctx.options.browser_name.clone(),
				token: ctx.options.token.clone(),
				client_id: ctx.options.client_id.clone(),
			};
			Ok(to_value(&result))
		}
		methods::GET_TABS => {
			let tabs = ctx.backend.list_tabs().await?;
			let listings: Vec<TabListing> = ctx.with_state(|state| {
				tabs.iter()
					.map(|info| TabListing {
						tab: info.descriptor(),
						automatable: is_automatable(&info.url),
						attached: state.registry.holder_of(info.id).is_some(),
					})
					.collect()
			});
			Ok(json!({ "tabs": listings }))
		}
		methods::RELOAD_SELF => Ok(json!({ "reloading": true })),
		methods::OPEN_TEST_PAGE => {
			let info = ctx.backend.create_tab(Some(ctx.options.test_page_url.as_str())).await?;
			Ok(json!({ "tab": info.descriptor() }))
		}
		_ => Err(RelayError::UnknownMethod(method.to_string())),
	}
}

async fn select_tab(ctx: &RelayContext, key: &SlotKey, params: SelectTabParams) -> Result<Value, RelayError> {
	let tab = TabId(params.tab_id);
	let Some(info) = ctx.backend.tab(tab).await? else {
		return Err(RelayError::TabGone {
			tab,
			reason: "tab does not exist".to_string(),
		});
	};
	if !is_automatable(&info.url) {
		return Err(RelayError::TabGone {
			tab,
			reason: format!("{} cannot be automated", info.url),
		});
	}
	let stealth = params.stealth.unwrap_or(ctx.options.default_stealth);
	attach_and_describe(ctx, key, info, stealth).await
}

async fn create_tab(ctx: &RelayContext, key: &SlotKey, params: CreateTabParams) -> Result<Value, RelayError> {
	if let Some(url) = params.url.as_deref().filter(|url| !is_automatable(url)) {
		return Err(RelayError::invalid_params(methods::CREATE_TAB, format!("{url} cannot be automated")));
	}
	let info = ctx.backend.create_tab(params.url.as_deref()).await?;
	let stealth = params.stealth.unwrap_or(ctx.options.default_stealth);
	attach_and_describe(ctx, key, info, stealth).await
}

async fn attach_and_describe(ctx: &RelayContext, key: &SlotKey, info: TabInfo, stealth: bool) -> Result<Value, RelayError> {
	let report = attachment::attach_tab(ctx, key, info.id, stealth).await?;
	Ok(json!({
		"attachedTab": info.descriptor(),
		"stealth": stealth,
		"telemetry": report.telemetry,
	}))
}

async fn forward_command(ctx: &RelayContext, key: &SlotKey, tab: TabId, params: ForwardCommandParams) -> Result<Value, RelayError> {
	let mut command_params = params.params.unwrap_or_else(|| json!({}));
	if params.method == "Runtime.evaluate" {
		let main = ctx.with_state(|state| state.slots.get(key).and_then(|slot| slot.contexts().main()));
		if let (Some(context_id), Some(object)) = (main, command_params.as_object_mut()) {
			if !object.contains_key("contextId") && !object.contains_key("uniqueContextId") {
				object.insert("contextId".to_string(), json!(context_id));
			}
		}
	}
	debug!(target = "pw.relay.dispatch", %tab, method = %params.method, "forwarding protocol command");
	Ok(ctx.backend.send_command(tab, &params.method, command_params).await?)
}

/// Tab of `key` once it is attached.
///
/// A slot that is attaching or recovering is polled for a bounded number of
/// intervals before giving up with `NoTabAttached`.
async fn require_tab(ctx: &RelayContext, key: &SlotKey) -> Result<TabId, RelayError> {
	let retry = ctx.options.retry;
	for poll in 0..=retry.settle_polls {
		let (phase, tab) = ctx.with_state(|state| (state.phase(key), state.registry.resolve_tab(key)));
		match (phase, tab) {
			(AttachmentPhase::Attached, Some(tab)) => return Ok(tab),
			(AttachmentPhase::Attaching | AttachmentPhase::Recovering, _) if poll < retry.settle_polls => {
				tokio::time::sleep(retry.settle_interval).await;
			}
			_ => break,
		}
	}
	Err(RelayError::NoTabAttached)
}

fn is_known(method: &str) -> bool {
	matches!(
		method,
		methods::FORWARD_CDP_COMMAND
			| methods::GET_CONSOLE_MESSAGES
			| methods::CLEAR_CONSOLE_MESSAGES
			| methods::GET_NETWORK_REQUESTS
			| methods::CLEAR_NETWORK_REQUESTS
			| methods::SET_STEALTH_MODE
			| methods::DETACH_TAB
			| methods::CLOSE_TAB
	)
}

fn parse<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, RelayError> {
	serde_json::from_value(params).map_err(|err| RelayError::invalid_params(method, err))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
	serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Newest `limit` entries, oldest first.
fn tail<T>(mut entries: Vec<T>, limit: Option<usize>) -> Vec<T> {
	if let Some(limit) = limit {
		let skip = entries.len().saturating_sub(limit);
		entries.drain(..skip);
	}
	entries
}

/// Wraps non-object results as `{value}` and adds `currentTab`.
pub fn with_current_tab(result: Value, current: Option<TabDescriptor>) -> Value {
	let mut object = match result {
		Value::Object(map) => map,
		other => {
			let mut map = Map::new();
			map.insert("value".to_string(), other);
			map
		}
	};
	object.insert("currentTab".to_string(), current.map(|tab| to_value(&tab)).unwrap_or(Value::Null));
	Value::Object(object)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scalar_results_are_wrapped() {
		let value = with_current_tab(json!(42), None);
		assert_eq!(value, json!({ "value": 42, "currentTab": null }));
	}

	#[test]
	fn current_tab_is_added_to_objects() {
		let tab = TabDescriptor {
			id: 3,
			title: "Example".to_string(),
			url: "https://example.com/".to_string(),
			index: 0,
		};
		let value = with_current_tab(json!({ "ok": true }), Some(tab));
		assert_eq!(value["ok"], true);
		assert_eq!(value["currentTab"]["id"], 3);
		assert_eq!(value["currentTab"]["url"], "https://example.com/");
	}

	#[test]
	fn tail_keeps_newest_entries() {
		assert_eq!(tail(vec![1, 2, 3, 4], Some(2)), vec![3, 4]);
		assert_eq!(tail(vec![1, 2], Some(10)), vec![1, 2]);
		assert_eq!(tail(vec![1, 2], None), vec![1, 2]);
	}

	#[test]
	fn control_ids_have_no_slot() {
		assert_eq!(slot_for(&AddressMode::ProxyControl), None);
		assert_eq!(
			slot_for(&AddressMode::Proxy {
				tenant: "alpha".to_string(),
				local_id: "1".to_string(),
			}),
			Some(SlotKey::tenant("alpha"))
		);
	}
}
