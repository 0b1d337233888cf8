//! Which tab URLs the debugging primitive may be pointed at.

use url::Url;

const BLOCKED_SCHEMES: &[&str] = &[
	"chrome",
	"chrome-extension",
	"chrome-search",
	"chrome-untrusted",
	"devtools",
	"edge",
	"brave",
	"opera",
	"vivaldi",
	"moz-extension",
	"view-source",
];

/// Returns `true` when automation may attach to a tab showing `url`.
///
/// Internal browser pages, extension pages, and the extension store refuse
/// debugger attachment. Unparseable URLs are treated as non-automatable.
pub fn is_automatable(url: &str) -> bool {
	let Ok(parsed) = Url::parse(url) else {
		return false;
	};

	let scheme = parsed.scheme();
	if BLOCKED_SCHEMES.contains(&scheme) {
		return false;
	}
	if scheme == "about" {
		return parsed.path() == "blank";
	}

	!is_extension_store(&parsed)
}

fn is_extension_store(url: &Url) -> bool {
	match url.host_str() {
		Some("chromewebstore.google.com") => true,
		Some("chrome.google.com") => url.path().starts_with("/webstore"),
		Some("microsoftedge.microsoft.com") => url.path().starts_with("/addons"),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn web_pages_are_automatable() {
		assert!(is_automatable("https://example.com/"));
		assert!(is_automatable("http://localhost:3000/app?x=1"));
		assert!(is_automatable("file:///tmp/index.html"));
		assert!(is_automatable("about:blank"));
		assert!(is_automatable("data:text/html,<p>hi</p>"));
	}

	#[test]
	fn internal_pages_are_not() {
		for url in [
			"chrome://settings",
			"chrome-extension://abcdefghijklmnopabcdefghijklmnop/popup.html",
			"edge://extensions",
			"devtools://devtools/bundled/inspector.html",
			"about:settings",
			"view-source:https://example.com",
			"moz-extension://1234/options.html",
		] {
			assert!(!is_automatable(url), "{url} should not be automatable");
		}
	}

	#[test]
	fn extension_store_is_not_automatable() {
		assert!(!is_automatable("https://chromewebstore.google.com/detail/foo/abc"));
		assert!(!is_automatable("https://chrome.google.com/webstore/category/extensions"));
		assert!(is_automatable("https://chrome.google.com/search"));
	}

	#[test]
	fn garbage_is_not_automatable() {
		assert!(!is_automatable(""));
		assert!(!is_automatable("not a url"));
	}
}
