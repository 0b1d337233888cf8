//! Best-effort identification of an extension that blocks debugger attachment.
//!
//! When the browser refuses to attach because injected content from another
//! extension is in the page, the error text rarely names the culprit. This
//! module tries a chain of [`BlockerSource`]s and falls back to
//! [`BlockerIdentity::Unknown`]. Nothing here affects correctness; the result
//! only feeds the error message.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::backend::ExtensionInfo;

static EXTENSION_URL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"chrome-extension://([a-p]{32})").ok());

/// Names of extensions known to inject content into every page.
const KEYWORDS: &[&str] = &[
	"grammarly",
	"lastpass",
	"1password",
	"bitwarden",
	"dashlane",
	"honey",
	"adblock",
	"ublock",
	"ghostery",
	"dark reader",
	"react developer",
	"redux",
	"vue.js devtools",
	"angular",
	"selenium",
	"puppeteer",
	"playwright",
	"automation",
	"debugger",
	"inspector",
];

/// Extension believed to block the debugging channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionIdentity {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockerIdentity {
	Known(ExtensionIdentity),
	Unknown,
}

impl BlockerIdentity {
	pub fn name(&self) -> Option<&str> {
		match self {
			BlockerIdentity::Known(ext) => Some(&ext.name),
			BlockerIdentity::Unknown => None,
		}
	}
}

/// One strategy for naming the blocker.
pub trait BlockerSource {
	fn identify(&self, detail: &str) -> Option<ExtensionIdentity>;
}

/// Extensions seen injecting execution contexts into attached pages.
pub struct TrackedOrigins<'a> {
	pub known: &'a HashMap<String, String>,
	pub installed: &'a [ExtensionInfo],
}

impl BlockerSource for TrackedOrigins<'_> {
	fn identify(&self, detail: &str) -> Option<ExtensionIdentity> {
		if let Some(id) = extension_id_in(detail) {
			let name = self
				.known
				.get(&id)
				.cloned()
				.or_else(|| self.installed.iter().find(|ext| ext.id == id).map(|ext| ext.name.clone()))
				.unwrap_or_else(|| id.clone());
			return Some(ExtensionIdentity { id: Some(id), name });
		}

		// A single tracked injector is the likely culprit.
		if self.known.len() == 1 {
			return self.known.iter().next().map(|(id, name)| ExtensionIdentity {
				id: Some(id.clone()),
				name: name.clone(),
			});
		}
		None
	}
}

/// Curated keyword match over enabled extension names.
pub struct KeywordHeuristic<'a> {
	pub installed: &'a [ExtensionInfo],
}

impl BlockerSource for KeywordHeuristic<'_> {
	fn identify(&self, _detail: &str) -> Option<ExtensionIdentity> {
		KEYWORDS.iter().find_map(|keyword| {
			self.installed
				.iter()
				.filter(|ext| ext.enabled)
				.find(|ext| ext.name.to_lowercase().contains(keyword))
				.map(|ext| ExtensionIdentity {
					id: Some(ext.id.clone()),
					name: ext.name.clone(),
				})
		})
	}
}

/// Runs `sources` in order and returns the first identification.
pub fn identify_blocker(detail: &str, sources: &[&dyn BlockerSource]) -> BlockerIdentity {
	sources
		.iter()
		.find_map(|source| source.identify(detail))
		.map(BlockerIdentity::Known)
		.unwrap_or(BlockerIdentity::Unknown)
}

fn extension_id_in(detail: &str) -> Option<String> {
	let regex = EXTENSION_URL.as_ref()?;
	regex.captures(detail).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	const GRAMMARLY_ID: &str = "kbfnbcaeplbcioakkpcpgfkobkghlhen";

	fn installed() -> Vec<ExtensionInfo> {
		vec![
			ExtensionInfo {
				id: "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
				name: "Tab Manager".to_string(),
				enabled: true,
			},
			ExtensionInfo {
				id: GRAMMARLY_ID.to_string(),
				name: "Grammarly: AI Writing".to_string(),
				enabled: true,
			},
		]
	}

	#[test]
	fn extension_url_in_error_names_blocker() {
		let known = HashMap::new();
		let installed = installed();
		let detail = format!("Cannot access a chrome-extension://{GRAMMARLY_ID}/ URL of different extension");
		let identity = identify_blocker(
			&detail,
			&[&TrackedOrigins {
				known: &known,
				installed: &installed,
			}],
		);
		assert_eq!(identity.name(), Some("Grammarly: AI Writing"));
	}

	#[test]
	fn single_tracked_injector_is_reported() {
		let mut known = HashMap::new();
		known.insert("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(), "Password Helper".to_string());
		let identity = identify_blocker("Cannot access contents of the page", &[&TrackedOrigins { known: &known, installed: &[] }]);
		assert_eq!(identity.name(), Some("Password Helper"));
	}

	#[test]
	fn keyword_heuristic_matches_enabled_names() {
		let installed = installed();
		let identity = identify_blocker("blocked", &[&KeywordHeuristic { installed: &installed }]);
		assert_eq!(identity.name(), Some("Grammarly: AI Writing"));
	}

	#[test]
	fn disabled_extensions_are_skipped() {
		let mut installed = installed();
		installed[1].enabled = false;
		let identity = identify_blocker("blocked", &[&KeywordHeuristic { installed: &installed }]);
		assert_eq!(identity, BlockerIdentity::Unknown);
	}

	#[test]
	fn nothing_matches_gives_unknown() {
		let known = HashMap::new();
		let identity = identify_blocker(
			"blocked",
			&[&TrackedOrigins { known: &known, installed: &[] }, &KeywordHeuristic { installed: &[] }],
		);
		assert_eq!(identity, BlockerIdentity::Unknown);
	}
}
