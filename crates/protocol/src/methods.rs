//! Method names understood by the relay.

pub const AUTHENTICATE: &str = "authenticate";
pub const GET_TABS: &str = "getTabs";
pub const SELECT_TAB: &str = "selectTab";
pub const CREATE_TAB: &str = "createTab";
pub const RELOAD_SELF: &str = "reloadSelf";
pub const OPEN_TEST_PAGE: &str = "openTestPage";

pub const FORWARD_CDP_COMMAND: &str = "forwardCDPCommand";
pub const GET_CONSOLE_MESSAGES: &str = "getConsoleMessages";
pub const CLEAR_CONSOLE_MESSAGES: &str = "clearConsoleMessages";
pub const GET_NETWORK_REQUESTS: &str = "getNetworkRequests";
pub const CLEAR_NETWORK_REQUESTS: &str = "clearNetworkRequests";
pub const SET_STEALTH_MODE: &str = "setStealthMode";
pub const DETACH_TAB: &str = "detachTab";
pub const CLOSE_TAB: &str = "closeTab";

/// Commands that run without an attached tab.
pub const TABLESS_METHODS: &[&str] = &[AUTHENTICATE, GET_TABS, SELECT_TAB, CREATE_TAB, RELOAD_SELF, OPEN_TEST_PAGE];

/// Inbound notifications.
pub mod notifications {
	pub const CONNECTION_STATUS: &str = "connectionStatus";
	pub const AUTHENTICATED: &str = "authenticated";
	pub const TENANT_DISCONNECTED: &str = "tenantDisconnected";
}

/// Returns `true` when `method` may run without an attached tab.
pub fn is_tabless(method: &str) -> bool {
	TABLESS_METHODS.contains(&method)
}
