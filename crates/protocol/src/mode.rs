//! Request-id addressing modes.
//!
//! One connection can carry a single direct client or many multiplexed
//! tenants. The mode is read off the id of each request and nothing else:
//!
//! | id                     | mode            |
//! |------------------------|-----------------|
//! | number                 | `Direct`        |
//! | `"control:..."`        | `ProxyControl`  |
//! | `"<tenant>:<local>"`   | `Proxy`         |
//! | any other string       | `Direct`        |

use crate::frame::RequestId;

/// Prefix marking meta-commands about the multiplexing layer itself.
pub const CONTROL_PREFIX: &str = "control:";

/// Separates the tenant key from the tenant-local request id.
pub const TENANT_SEPARATOR: char = ':';

/// Addressing mode of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMode {
	/// Single-tenant client; attachment state lives on the connection itself.
	Direct,
	/// Meta-command for the multiplexing layer (e.g. authentication).
	ProxyControl,
	/// Multiplexed tenant command.
	Proxy { tenant: String, local_id: String },
}

/// Classifies `id`. Pure: the result depends on the id value only.
///
/// The tenant key is everything before the *first* separator; the local id
/// may itself contain separators.
pub fn resolve_mode(id: &RequestId) -> AddressMode {
	let RequestId::String(raw) = id else {
		return AddressMode::Direct;
	};

	if raw.starts_with(CONTROL_PREFIX) {
		return AddressMode::ProxyControl;
	}

	match raw.split_once(TENANT_SEPARATOR) {
		Some((tenant, local_id)) => AddressMode::Proxy {
			tenant: tenant.to_string(),
			local_id: local_id.to_string(),
		},
		None => AddressMode::Direct,
	}
}
