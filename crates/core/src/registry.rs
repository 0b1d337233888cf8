//! Ownership of tabs by session slots.
//!
//! A slot is either the connection's direct client or one multiplexed tenant.
//! The registry keeps `tab_for_slot` and `slot_for_tab` as exact inverses, so
//! one tab is never claimed by two slots.

use std::collections::HashMap;

use crate::backend::TabId;

/// Owner of an attachment slot on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
	/// Single-tenant client addressing the connection directly.
	Direct,
	/// Multiplexed tenant, keyed by its opaque tenant key.
	Tenant(String),
}

impl SlotKey {
	pub fn tenant(key: impl Into<String>) -> Self {
		SlotKey::Tenant(key.into())
	}
}

impl std::fmt::Display for SlotKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SlotKey::Direct => write!(f, "direct client"),
			SlotKey::Tenant(key) => write!(f, "tenant '{key}'"),
		}
	}
}

/// `bind` refused because another slot holds the tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabAlreadyBound {
	pub tab: TabId,
	pub holder: SlotKey,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
	tab_for_slot: HashMap<SlotKey, TabId>,
	slot_for_tab: HashMap<TabId, SlotKey>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds `key` to `tab`, replacing any previous tab of `key`.
	///
	/// Rebinding a slot to the tab it already holds is a no-op.
	pub fn bind(&mut self, key: SlotKey, tab: TabId) -> Result<(), TabAlreadyBound> {
		if let Some(holder) = self.slot_for_tab.get(&tab) {
			if *holder == key {
				return Ok(());
			}
			return Err(TabAlreadyBound { tab, holder: holder.clone() });
		}

		if let Some(previous) = self.tab_for_slot.insert(key.clone(), tab) {
			self.slot_for_tab.remove(&previous);
		}
		self.slot_for_tab.insert(tab, key);
		Ok(())
	}

	/// Idempotent; returns the tab the slot held.
	pub fn unbind(&mut self, key: &SlotKey) -> Option<TabId> {
		let tab = self.tab_for_slot.remove(key)?;
		self.slot_for_tab.remove(&tab);
		Some(tab)
	}

	pub fn resolve_tab(&self, key: &SlotKey) -> Option<TabId> {
		self.tab_for_slot.get(key).copied()
	}

	pub fn holder_of(&self, tab: TabId) -> Option<&SlotKey> {
		self.slot_for_tab.get(&tab)
	}

	pub fn bound_tabs(&self) -> impl Iterator<Item = TabId> + '_ {
		self.slot_for_tab.keys().copied()
	}

	pub fn len(&self) -> usize {
		self.tab_for_slot.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tab_for_slot.is_empty()
	}

	/// Drops every binding at once; used on connection teardown.
	pub fn clear(&mut self) {
		self.tab_for_slot.clear();
		self.slot_for_tab.clear();
	}

	#[cfg(test)]
	fn is_consistent(&self) -> bool {
		self.tab_for_slot.len() == self.slot_for_tab.len()
			&& self.tab_for_slot.iter().all(|(key, tab)| self.slot_for_tab.get(tab) == Some(key))
	}
}
