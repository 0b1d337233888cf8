//! Tab attachment state machine.
//!
//! Each session slot (the direct client, or one tenant) owns an
//! [`AttachmentSlot`]:
//!
//! ```text
//!            select/create              attach ok
//! Detached ─────────────────▶ Attaching ─────────▶ Attached
//!    ▲                            │                  │  │
//!    │        attach failed       │                  │  │ unsolicited detach
//!    ├────────────────────────────┘     detach/close │  ▼
//!    ├───────────────────────────────────────────────┘ Recovering
//!    │          tab gone / not automatable / retries     │
//!    └───────────────────────────────────────────────────┤
//!                                 reattached             │
//!                      Attached ◀────────────────────────┘
//! ```
//!
//! The slot can be overwritten while a backend call is in flight. Every
//! transition that starts async work bumps the slot's [`Epoch`]; the work
//! carries the epoch it was issued under and only applies its result while
//! that epoch is still current. A superseded completion is discarded.

use serde_json::json;
use tracing::{debug, info, warn};

use crate::backend::{AttachError, TabId};
use crate::blocking::{KeywordHeuristic, TrackedOrigins, identify_blocker};
use crate::context::ExecutionContexts;
use crate::error::{BlockingCause, RelayError};
use crate::registry::SlotKey;
use crate::scheme::is_automatable;
use crate::state::RelayContext;


/// Commands that turn on the passive telemetry channels of a tab.
const TELEMETRY_CHANNELS: &[&str] = &["Runtime.enable", "Page.enable", "Network.enable", "Log.enable"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentPhase {
	#[default]
	Detached,
	Attaching,
	Attached,
	Recovering,
}

/// Generation counter of a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
	fn next(self) -> Self {
		Epoch(self.0.wrapping_add(1))
	}
}

#[derive(Debug, Default)]
pub struct AttachmentSlot {
	phase: AttachmentPhase,
	stealth: bool,
	telemetry: bool,
	epoch: Epoch,
	contexts: ExecutionContexts,
}

impl AttachmentSlot {
	pub fn phase(&self) -> AttachmentPhase {
		self.phase
	}

	pub fn stealth(&self) -> bool {
		self.stealth
	}

	pub fn set_stealth(&mut self, stealth: bool) {
		self.stealth = stealth;
	}

	/// Whether the telemetry channels were enabled on the current attachment.
	pub fn telemetry_enabled(&self) -> bool {
		self.telemetry
	}

	pub fn epoch(&self) -> Epoch {
		self.epoch
	}

	pub fn is_current(&self, epoch: Epoch) -> bool {
		self.epoch == epoch
	}

	pub fn contexts(&self) -> &ExecutionContexts {
		&self.contexts
	}

	pub fn contexts_mut(&mut self) -> &mut ExecutionContexts {
		&mut self.contexts
	}

	/// Enters `Attaching` from any phase and returns the new epoch.
	///
	/// Execution-context bookkeeping is kept only when re-attaching the same tab.
	pub fn begin_attach(&mut self, stealth: bool, same_tab: bool) -> Epoch {
		self.epoch = self.epoch.next();
		self.phase = AttachmentPhase::Attaching;
		self.stealth = stealth;
		self.telemetry = false;
		if !same_tab {
			self.contexts.reset();
		}
		self.epoch
	}

	/// Moves `Attaching`/`Recovering` to `Attached` if `epoch` is still current.
	pub fn finish_attach(&mut self, epoch: Epoch, telemetry: bool) -> bool {
		let in_flight = matches!(self.phase, AttachmentPhase::Attaching | AttachmentPhase::Recovering);
		if !in_flight || !self.is_current(epoch) {
			return false;
		}
		self.phase = AttachmentPhase::Attached;
		self.telemetry = telemetry;
		true
	}

	/// Enters `Recovering`; only an `Attached` slot can recover.
	///
	/// Execution contexts are retained as a fallback for the reattached page.
	pub fn begin_recovery(&mut self) -> Option<Epoch> {
		if self.phase != AttachmentPhase::Attached {
			return None;
		}
		self.epoch = self.epoch.next();
		self.phase = AttachmentPhase::Recovering;
		Some(self.epoch)
	}

	/// Back to `Detached`; forgets stealth and execution contexts.
	pub fn release(&mut self) {
		self.epoch = self.epoch.next();
		self.phase = AttachmentPhase::Detached;
		self.stealth = false;
		self.telemetry = false;
		self.contexts.reset();
	}
}

/// Result of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachReport {
	/// Telemetry channels were enabled.
	pub telemetry: bool,
	pub main_context: Option<i64>,
}

/// How handling an unsolicited detach ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
	/// Back to `Attached` on the same tab.
	Reattached,
	/// Tab gone, not automatable, or retries exhausted; slot is `Detached`.
	Released,
	/// A newer transition took over the slot mid-recovery.
	Superseded,
	/// No attached slot held the tab.
	Ignored,
}

/// Attaches `key`'s slot to `tab`, moving it off any previous tab.
///
/// Selecting the tab the slot is already attached to only updates stealth.
pub(crate) async fn attach_tab(ctx: &RelayContext, key: &SlotKey, tab: TabId, stealth: bool) -> Result<AttachReport, RelayError> {
	let (epoch, previous) = {
		let mut guard = ctx.state.lock();
		let state = &mut *guard;
		let previous = state.registry.resolve_tab(key);

		if previous == Some(tab) && state.phase(key) == AttachmentPhase::Attached {
			let slot = state.slot_mut(key);
			slot.set_stealth(stealth);
			debug!(target = "pw.relay.attach", %key, %tab, stealth, "tab already attached");
			return Ok(AttachReport {
				telemetry: slot.telemetry_enabled(),
				main_context: slot.contexts().main(),
			});
		}

		state.registry.bind(key.clone(), tab).map_err(|conflict| RelayError::TabAlreadyBound {
			tab: conflict.tab,
			holder: conflict.holder,
		})?;
		if let Some(old) = previous.filter(|old| *old != tab) {
			state.telemetry.clear(old);
		}
		let epoch = state.slot_mut(key).begin_attach(stealth, previous == Some(tab));
		(epoch, previous)
	};

	info!(target = "pw.relay.attach", %key, %tab, stealth, "attaching");
	if let Some(old) = previous {
		// Same tab too: a half-finished attach or recovery may still hold it.
		detach_quietly(ctx, old).await;
	}

	if let Err(err) = ctx.backend.attach(tab).await {
		ctx.with_state(|state| {
			if state.slots.get(key).is_some_and(|slot| slot.is_current(epoch)) {
				state.release(key);
			}
		});
		return Err(classify_attach_failure(ctx, tab, err).await);
	}

	let telemetry = enable_channels(ctx, tab).await;
	let applied = ctx.with_state(|state| state.slots.get_mut(key).is_some_and(|slot| slot.finish_attach(epoch, telemetry)));
	if !applied {
		detach_orphan(ctx, tab).await;
		return Err(RelayError::Superseded { tab });
	}

	if let Err(err) = ctx.backend.activate_tab(tab).await {
		debug!(target = "pw.relay.attach", %tab, error = %err, "could not focus tab");
	}
	let main_context = resolve_main_context(ctx, key, epoch, tab).await;
	info!(target = "pw.relay.attach", %key, %tab, telemetry, ?main_context, "attached");
	Ok(AttachReport { telemetry, main_context })
}

/// Voluntary detach of `key`'s slot. Idempotent; returns the released tab.
pub(crate) async fn detach_slot(ctx: &RelayContext, key: &SlotKey) -> Option<TabId> {
	let tab = ctx.with_state(|state| state.release(key));
	match tab {
		Some(tab) => {
			info!(target = "pw.relay.attach", %key, %tab, "detached");
			detach_quietly(ctx, tab).await;
		}
		None => debug!(target = "pw.relay.attach", %key, "detach with nothing attached"),
	}
	tab
}

/// Drops `key`'s slot and binding in one step; returns the tab it held.
///
/// The backend detach is left to the caller so a new attach by the same key
/// can never be unbound by a late cleanup.
pub(crate) fn forget_slot(ctx: &RelayContext, key: &SlotKey) -> Option<TabId> {
	let tab = ctx.with_state(|state| state.forget(key));
	info!(target = "pw.relay.attach", %key, tab = ?tab, "slot forgotten");
	tab
}

/// Claim on a slot that is recovering from an unsolicited detach.
#[derive(Debug, Clone)]
pub struct RecoveryTicket {
	key: SlotKey,
	epoch: Epoch,
	tab: TabId,
}

/// Moves the slot holding `tab` into `Recovering`.
///
/// Runs synchronously on the connection loop so commands issued right after
/// the detach already see the slot as recovering. `None` when no attached
/// slot holds `tab`.
pub(crate) fn start_recovery(ctx: &RelayContext, tab: TabId, reason: &str) -> Option<RecoveryTicket> {
	let ticket = ctx.with_state(|state| {
		let key = state.registry.holder_of(tab).cloned()?;
		let epoch = state.slots.get_mut(&key)?.begin_recovery()?;
		Some(RecoveryTicket { key, epoch, tab })
	});
	match &ticket {
		Some(ticket) => info!(target = "pw.relay.attach", key = %ticket.key, %tab, reason, "unsolicited detach; recovering"),
		None => debug!(target = "pw.relay.attach", %tab, reason, "detach for a tab no attached slot holds; ignored"),
	}
	ticket
}

/// Reattaches when the tab still exists on an automatable page; otherwise,
/// or once retries run out, the slot goes to `Detached`. The connection is
/// never affected.
pub(crate) async fn run_recovery(ctx: &RelayContext, ticket: RecoveryTicket) -> RecoveryOutcome {
	let RecoveryTicket { key, epoch, tab } = ticket;
	let info = match ctx.backend.tab(tab).await {
		Ok(Some(info)) => info,
		Ok(None) => return give_up(ctx, &key, epoch, tab, "tab no longer exists"),
		Err(err) => {
			debug!(target = "pw.relay.attach", %tab, error = %err, "tab lookup failed");
			return give_up(ctx, &key, epoch, tab, "tab lookup failed");
		}
	};
	if !is_automatable(&info.url) {
		return give_up(ctx, &key, epoch, tab, "tab is showing a page that cannot be automated");
	}

	let retry = ctx.options.retry;
	let mut reattached = false;
	for attempt in 1..=retry.reattach_attempts {
		if !is_current(ctx, &key, epoch) {
			return RecoveryOutcome::Superseded;
		}
		match ctx.backend.attach(tab).await {
			Ok(()) => {
				reattached = true;
				break;
			}
			Err(err) => debug!(target = "pw.relay.attach", %tab, attempt, error = %err, "reattach attempt failed"),
		}
		if attempt < retry.reattach_attempts {
			tokio::time::sleep(retry.reattach_delay).await;
		}
	}
	if !reattached {
		return give_up(ctx, &key, epoch, tab, "reattach attempts exhausted");
	}

	let telemetry = enable_channels(ctx, tab).await;
	let applied = ctx.with_state(|state| state.slots.get_mut(&key).is_some_and(|slot| slot.finish_attach(epoch, telemetry)));
	if !applied {
		detach_orphan(ctx, tab).await;
		return RecoveryOutcome::Superseded;
	}

	let main_context = resolve_main_context(ctx, &key, epoch, tab).await;
	info!(target = "pw.relay.attach", %key, %tab, ?main_context, "recovered");
	RecoveryOutcome::Reattached
}

fn give_up(ctx: &RelayContext, key: &SlotKey, epoch: Epoch, tab: TabId, why: &str) -> RecoveryOutcome {
	let released = ctx.with_state(|state| {
		let current = state.slots.get(key).is_some_and(|slot| slot.is_current(epoch));
		if current {
			state.release(key);
		}
		current
	});
	if !released {
		return RecoveryOutcome::Superseded;
	}
	warn!(target = "pw.relay.attach", %key, %tab, why, "recovery failed; slot detached");
	RecoveryOutcome::Released
}

fn is_current(ctx: &RelayContext, key: &SlotKey, epoch: Epoch) -> bool {
	ctx.with_state(|state| state.slots.get(key).is_some_and(|slot| slot.is_current(epoch)))
}

/// Drops a backend attachment nobody holds any more.
/// Detaches `tab` at the backend unless some slot has claimed it meanwhile.
pub(crate) async fn detach_orphan(ctx: &RelayContext, tab: TabId) {
	let orphaned = ctx.with_state(|state| state.registry.holder_of(tab).is_none());
	debug!(target = "pw.relay.attach", %tab, orphaned, "discarding attachment");
	if orphaned {
		detach_quietly(ctx, tab).await;
	}
}

async fn detach_quietly(ctx: &RelayContext, tab: TabId) {
	if let Err(err) = ctx.backend.detach(tab).await {
		debug!(target = "pw.relay.attach", %tab, error = %err, "backend detach failed");
	}
}

/// Best-effort; a failure leaves automation usable without telemetry.
async fn enable_channels(ctx: &RelayContext, tab: TabId) -> bool {
	let mut enabled = true;
	for method in TELEMETRY_CHANNELS {
		if let Err(err) = ctx.backend.send_command(tab, method, json!({})).await {
			warn!(target = "pw.relay.attach", %tab, method, error = %err, "telemetry channel unavailable");
			enabled = false;
		}
	}
	enabled
}

/// Waits for the main execution context, nudging the page with a no-op evaluation.
async fn resolve_main_context(ctx: &RelayContext, key: &SlotKey, epoch: Epoch, tab: TabId) -> Option<i64> {
	let retry = ctx.options.retry;
	for attempt in 0..=retry.context_attempts {
		let known = ctx.with_state(|state| {
			state
				.slots
				.get(key)
				.filter(|slot| slot.is_current(epoch))
				.map(|slot| slot.contexts().main())
		});
		match known {
			None => return None,
			Some(Some(id)) => return Some(id),
			Some(None) if attempt == retry.context_attempts => break,
			Some(None) => {}
		}

		let probe = json!({ "expression": "void 0", "returnByValue": true });
		if let Err(err) = ctx.backend.send_command(tab, "Runtime.evaluate", probe).await {
			debug!(target = "pw.relay.attach", %tab, attempt, error = %err, "context probe failed");
		}
		tokio::time::sleep(retry.context_delay).await;
	}
	debug!(target = "pw.relay.attach", %tab, "main execution context not resolved");
	None
}

async fn classify_attach_failure(ctx: &RelayContext, tab: TabId, err: AttachError) -> RelayError {
	match err {
		AttachError::AlreadyDebugged(detail) => {
			warn!(target = "pw.relay.attach", %tab, %detail, "tab owned by another debugger");
			RelayError::AttachmentBlocked {
				tab,
				cause: BlockingCause::OtherDebugger,
			}
		}
		AttachError::Blocked(detail) => {
			let installed = ctx.backend.list_extensions().await.unwrap_or_else(|err| {
				debug!(target = "pw.relay.attach", error = %err, "extension listing failed");
				Vec::new()
			});
			let known = ctx.with_state(|state| state.known_extensions.clone());
			let tracked = TrackedOrigins {
				known: &known,
				installed: &installed,
			};
			let keywords = KeywordHeuristic { installed: &installed };
			let identity = identify_blocker(&detail, &[&tracked, &keywords]);
			warn!(target = "pw.relay.attach", %tab, %detail, blocker = identity.name().unwrap_or("unknown"), "attach blocked by extension");
			RelayError::AttachmentBlocked {
				tab,
				cause: BlockingCause::Extension(identity),
			}
		}
		AttachError::TabNotFound(_) => RelayError::TabGone {
			tab,
			reason: "tab does not exist".to_string(),
		},
		AttachError::Other(reason) => RelayError::AttachFailed { tab, reason },
	}
}
