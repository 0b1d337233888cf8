//! Inputs the relay core reads. Loading them from files or flags is the host's job.

use std::time::Duration;

/// Ring capacities for captured telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryLimits {
	/// Console entries kept per tab.
	pub console_per_tab: usize,
	/// Completed network entries kept per tab.
	pub network_per_tab: usize,
	/// Requests awaiting their response, across all tabs.
	pub pending_requests: usize,
}

impl Default for TelemetryLimits {
	fn default() -> Self {
		Self {
			console_per_tab: 1000,
			network_per_tab: 500,
			pending_requests: 2000,
		}
	}
}

/// Bounded retry schedule for attachment and execution-context recovery.
///
/// Everything is attempt-counted; there are no wall-clock deadlines on
/// in-flight backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub reattach_attempts: u32,
	pub reattach_delay: Duration,
	pub context_attempts: u32,
	pub context_delay: Duration,
	/// Polls a command makes while its slot is attaching or recovering.
	pub settle_polls: u32,
	pub settle_interval: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			reattach_attempts: 3,
			reattach_delay: Duration::from_millis(500),
			context_attempts: 3,
			context_delay: Duration::from_millis(200),
			settle_polls: 20,
			settle_interval: Duration::from_millis(100),
		}
	}
}

impl RetryPolicy {
	/// Millisecond-scale schedule for tests.
	pub fn fast() -> Self {
		Self {
			reattach_attempts: 3,
			reattach_delay: Duration::from_millis(5),
			context_attempts: 3,
			context_delay: Duration::from_millis(5),
			settle_polls: 40,
			settle_interval: Duration::from_millis(5),
		}
	}
}

/// Per-connection relay settings.
#[derive(Debug, Clone)]
pub struct RelayOptions {
	/// Browser display name reported during authentication.
	pub browser_name: String,
	/// Stable client identifier reported during authentication.
	pub client_id: String,
	/// Optional bearer credential echoed during authentication.
	pub token: Option<String>,
	/// Stealth flag applied when a select/create request does not specify one.
	pub default_stealth: bool,
	/// Page opened by `openTestPage`.
	pub test_page_url: String,
	pub reaper_interval: Duration,
	pub limits: TelemetryLimits,
	pub retry: RetryPolicy,
}

impl RelayOptions {
	pub fn new(browser_name: impl Into<String>, client_id: impl Into<String>) -> Self {
		Self {
			browser_name: browser_name.into(),
			client_id: client_id.into(),
			token: None,
			default_stealth: false,
			test_page_url: "about:blank".to_string(),
			reaper_interval: Duration::from_secs(60),
			limits: TelemetryLimits::default(),
			retry: RetryPolicy::default(),
		}
	}

	pub fn with_token(mut self, token: Option<String>) -> Self {
		self.token = token;
		self
	}

	pub fn with_default_stealth(mut self, stealth: bool) -> Self {
		self.default_stealth = stealth;
		self
	}

	pub fn with_test_page_url(mut self, url: impl Into<String>) -> Self {
		self.test_page_url = url.into();
		self
	}

	pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
		self.reaper_interval = interval;
		self
	}

	pub fn with_limits(mut self, limits: TelemetryLimits) -> Self {
		self.limits = limits;
		self
	}

	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}
}

impl Default for RelayOptions {
	fn default() -> Self {
		Self::new("Chrome", "pw-relay")
	}
}
