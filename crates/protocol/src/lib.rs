//! Wire types for the pw-relay JSON-RPC link.
//!
//! This crate contains the shapes exchanged between the relay and the remote
//! automation server: request/notification/response envelopes, the frame codec,
//! request-id addressing modes, error codes, and the payloads carried by the
//! relay's own methods.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and pure classification
//! * Stable: Changes only when the wire protocol changes
//!
//! Connection state, tab attachment and telemetry live in `pw-relay`.

pub mod codes;
pub mod frame;
pub mod methods;
pub mod mode;
pub mod types;

pub use codes::ErrorObject;
pub use frame::*;
pub use mode::*;
pub use types::*;
