//! Connection actor: one per link to the automation server.
//!
//! The actor owns every piece of relay state for its link. It is driven by
//! three inputs merged in a single loop:
//!
//! - inbound text frames from the transport
//! - [`BackendEvent`]s from the browser backend
//! - the reaper timer
//!
//! Notifications and backend events are applied inline, in arrival order.
//! Requests are dispatched on their own tasks so a slow backend call stalls
//! only that request; responses go out in completion order.
//!
//! # Example
//!
//! ```ignore
//! let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
//! let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
//!
//! let connection = Connection::new(backend, RelayOptions::default(), outbound_tx);
//! let exit = tokio::spawn(connection.run(inbound_rx, backend_events));
//!
//! inbound_tx.send(r#"{"jsonrpc":"2.0","id":1,"method":"getTabs"}"#.to_string())?;
//! let reply = outbound_rx.recv().await;
//! ```

use std::sync::Arc;

use pw_relay_protocol::methods::{self, notifications};
use pw_relay_protocol::{
	AuthenticatedParams, ConnectionStatusParams, ErrorObject, InboundFrame, Notification, Request, Response, TenantDisconnectedParams,
	decode, encode_response, resolve_mode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::attachment::{self, RecoveryTicket};
use crate::backend::{BackendEvent, BrowserBackend};
use crate::dispatcher::dispatch;
use crate::events::apply_event;
use crate::options::RelayOptions;
use crate::reaper;
use crate::registry::SlotKey;
use crate::state::RelayContext;

/// Why [`Connection::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionExit {
	/// The transport's inbound stream ended.
	TransportClosed,
	/// The peer asked the relay to reload; the host should reconnect fresh.
	ReloadRequested,
	/// The backend event stream ended.
	BackendClosed,
}

pub struct Connection {
	ctx: Arc<RelayContext>,
	outbound: mpsc::UnboundedSender<String>,
	reload: Arc<Notify>,
}

impl Connection {
	/// Creates a connection writing encoded frames to `outbound`.
	pub fn new(backend: Arc<dyn BrowserBackend>, options: RelayOptions, outbound: mpsc::UnboundedSender<String>) -> Self {
		Self {
			ctx: Arc::new(RelayContext::new(backend, options)),
			outbound,
			reload: Arc::new(Notify::new()),
		}
	}

	/// Shared state handle, mainly for inspection in tests.
	pub fn context(&self) -> Arc<RelayContext> {
		Arc::clone(&self.ctx)
	}

	/// Runs until the transport closes, the backend goes away, or a reload is requested.
	///
	/// All state is released before returning; attached tabs are detached best-effort.
	pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<String>, mut events: mpsc::UnboundedReceiver<BackendEvent>) -> ConnectionExit {
		let period = self.ctx.options.reaper_interval;
		let mut reaper = tokio::time::interval_at(Instant::now() + period, period);
		reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut tasks = JoinSet::new();

		info!(target = "pw.relay.connection", client_id = %self.ctx.options.client_id, "connection open");
		let exit = loop {
			tokio::select! {
				frame = inbound.recv() => match frame {
					Some(text) => self.on_frame(&text, &mut tasks),
					None => break ConnectionExit::TransportClosed,
				},
				event = events.recv() => match event {
					Some(event) => self.on_backend_event(event, &mut tasks),
					None => {
						warn!(target = "pw.relay.connection", "backend event stream ended");
						break ConnectionExit::BackendClosed;
					}
				},
				_ = self.reload.notified() => break ConnectionExit::ReloadRequested,
				_ = reaper.tick() => {
					let ctx = Arc::clone(&self.ctx);
					tasks.spawn(async move {
						// Failure is logged by the sweep and retried next tick.
						let _ = reaper::sweep(&ctx).await;
					});
				}
				Some(joined) = tasks.join_next() => {
					if let Err(err) = joined {
						if err.is_panic() {
							error!(target = "pw.relay.connection", error = %err, "request task panicked");
						}
					}
				}
			}
		};

		tasks.shutdown().await;
		self.teardown().await;
		info!(target = "pw.relay.connection", ?exit, "connection closed");
		exit
	}

	fn on_frame(&self, text: &str, tasks: &mut JoinSet<()>) {
		match decode(text.as_bytes()) {
			Ok(InboundFrame::Request(request)) => {
				let ctx = Arc::clone(&self.ctx);
				let outbound = self.outbound.clone();
				let reload = Arc::clone(&self.reload);
				tasks.spawn(handle_request(ctx, outbound, reload, request));
			}
			Ok(InboundFrame::Notification(notification)) => self.on_notification(notification, tasks),
			Ok(InboundFrame::Response(response)) => {
				debug!(target = "pw.relay.codec", id = ?response.id, "ignoring inbound response");
			}
			Err(err) => {
				warn!(target = "pw.relay.codec", error = %err, "malformed frame");
				let response = Response::failure(err.request_id().cloned(), ErrorObject::parse_error(err.to_string()));
				send_response(&self.outbound, &response);
			}
		}
	}

	fn on_notification(&self, notification: Notification, tasks: &mut JoinSet<()>) {
		let Notification { method, params } = notification;
		match method.as_str() {
			notifications::CONNECTION_STATUS => {
				if let Some(status) = parse_notification::<ConnectionStatusParams>(&method, params.clone()) {
					info!(target = "pw.relay.connection", connected = status.connected, "connection status");
					self.ctx.with_state(|state| state.peer.status = Some(params));
				}
			}
			notifications::AUTHENTICATED => {
				if let Some(auth) = parse_notification::<AuthenticatedParams>(&method, params) {
					info!(target = "pw.relay.connection", connection_id = %auth.connection_id, client = ?auth.client_name, "authenticated");
					self.ctx.with_state(|state| {
						state.peer.connection_id = Some(auth.connection_id);
						state.peer.client_name = auth.client_name;
					});
				}
			}
			notifications::TENANT_DISCONNECTED => {
				if let Some(TenantDisconnectedParams { tenant }) = parse_notification(&method, params) {
					info!(target = "pw.relay.connection", %tenant, "tenant disconnected");
					if let Some(tab) = attachment::forget_slot(&self.ctx, &SlotKey::Tenant(tenant)) {
						let ctx = Arc::clone(&self.ctx);
						tasks.spawn(async move { attachment::detach_orphan(&ctx, tab).await });
					}
				}
			}
			other => debug!(target = "pw.relay.connection", method = other, "unknown notification ignored"),
		}
	}

	fn on_backend_event(&self, event: BackendEvent, tasks: &mut JoinSet<()>) {
		match event {
			BackendEvent::Protocol { tab, method, params } => {
				self.ctx.with_state(|state| apply_event(state, tab, &method, &params));
			}
			BackendEvent::Detached { tab, reason } => {
				if let Some(ticket) = attachment::start_recovery(&self.ctx, tab, &reason) {
					tasks.spawn(run_recovery(Arc::clone(&self.ctx), ticket));
				}
			}
		}
	}

	async fn teardown(&self) {
		let tabs = self.ctx.with_state(|state| {
			let tabs: Vec<_> = state.registry.bound_tabs().collect();
			state.clear();
			tabs
		});
		for tab in tabs {
			if let Err(err) = self.ctx.backend.detach(tab).await {
				debug!(target = "pw.relay.connection", %tab, error = %err, "detach on teardown failed");
			}
		}
	}
}

async fn handle_request(ctx: Arc<RelayContext>, outbound: mpsc::UnboundedSender<String>, reload: Arc<Notify>, request: Request) {
	let Request { id, method, params } = request;
	let mode = resolve_mode(&id);
	debug!(target = "pw.relay.dispatch", %id, %method, ?mode, "request");

	let response = match dispatch(&ctx, &mode, &method, params).await {
		Ok(result) => Response::success(id, Some(result)),
		Err(err) => {
			debug!(target = "pw.relay.dispatch", %id, %method, code = err.code(), error = %err, "request failed");
			Response::failure(Some(id), err.to_error_object())
		}
	};
	send_response(&outbound, &response);

	if method == methods::RELOAD_SELF && !response.is_error() {
		reload.notify_one();
	}
}

async fn run_recovery(ctx: Arc<RelayContext>, ticket: RecoveryTicket) {
	let outcome = attachment::run_recovery(&ctx, ticket).await;
	debug!(target = "pw.relay.attach", ?outcome, "recovery finished");
}

fn send_response(outbound: &mpsc::UnboundedSender<String>, response: &Response) {
	let text = match encode_response(response).map(String::from_utf8) {
		Ok(Ok(text)) => text,
		Ok(Err(err)) => {
			error!(target = "pw.relay.codec", error = %err, "encoded response is not UTF-8");
			return;
		}
		Err(err) => {
			error!(target = "pw.relay.codec", error = %err, "failed to encode response");
			return;
		}
	};
	if outbound.send(text).is_err() {
		debug!(target = "pw.relay.connection", id = ?response.id, "transport gone; response dropped");
	}
}

fn parse_notification<T: DeserializeOwned>(method: &str, params: Value) -> Option<T> {
	match serde_json::from_value(params) {
		Ok(parsed) => Some(parsed),
		Err(err) => {
			warn!(target = "pw.relay.connection", method, error = %err, "malformed notification ignored");
			None
		}
	}
}
