//! Periodic eviction of state for tabs that no longer exist.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::attachment::AttachmentPhase;
use crate::backend::{BackendError, TabId};
use crate::registry::SlotKey;
use crate::state::RelayContext;

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
	/// Tabs whose telemetry buffers were dropped.
	pub evicted: Vec<TabId>,
	/// Attached slots released because their tab vanished.
	pub released: Vec<SlotKey>,
}

impl SweepReport {
	pub fn is_empty(&self) -> bool {
		self.evicted.is_empty() && self.released.is_empty()
	}
}

/// Evicts telemetry and bindings for tabs missing from the browser's tab list.
///
/// A failed tab enumeration aborts the sweep before anything is touched.
/// Slots that are mid-attach or mid-recovery are left to the state machine.
pub async fn sweep(ctx: &RelayContext) -> Result<SweepReport, BackendError> {
	let tracked = ctx.with_state(|state| {
		let mut tracked = state.telemetry.tracked_tabs();
		tracked.extend(state.registry.bound_tabs());
		tracked
	});
	if tracked.is_empty() {
		return Ok(SweepReport::default());
	}

	let live: HashSet<TabId> = match ctx.backend.list_tabs().await {
		Ok(tabs) => tabs.into_iter().map(|info| info.id).collect(),
		Err(err) => {
			warn!(target = "pw.relay.reaper", error = %err, "tab enumeration failed; sweep skipped");
			return Err(err);
		}
	};

	let report = ctx.with_state(|state| {
		let mut report = SweepReport::default();
		for tab in tracked.into_iter().filter(|tab| !live.contains(tab)) {
			if let Some(key) = state.registry.holder_of(tab).cloned() {
				if state.phase(&key) != AttachmentPhase::Attached {
					continue;
				}
				state.release(&key);
				report.released.push(key);
			}
			state.telemetry.clear(tab);
			report.evicted.push(tab);
		}
		report
	});

	if report.is_empty() {
		debug!(target = "pw.relay.reaper", "sweep found nothing stale");
	} else {
		info!(target = "pw.relay.reaper", evicted = ?report.evicted, released = report.released.len(), "stale tab state evicted");
	}
	Ok(report)
}
