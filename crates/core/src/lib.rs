//! Relay core: bridges a JSON-RPC automation link to browser tab debugging.
//!
//! A [`Connection`] owns everything for one link: the session registry that
//! maps the direct client or multiplexed tenants to tabs, one attachment state
//! machine per session, and per-tab console/network telemetry. The browser
//! itself sits behind [`BrowserBackend`]; `pw-relay-runtime` provides the
//! Chrome DevTools Protocol implementation and [`fake::FakeBrowser`] an
//! in-memory one.
//!
//! # Layout
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`backend`] | Capability trait consumed by the core |
//! | [`registry`] | Tenant/tab ownership |
//! | [`attachment`] | Attach, detach and recovery state machine |
//! | [`context`] | Execution-context bookkeeping |
//! | [`telemetry`] | Console and network ring buffers |
//! | [`events`] | Protocol events into state |
//! | [`dispatcher`] | Method routing and preconditions |
//! | [`reaper`] | Eviction of state for closed tabs |
//! | [`connection`] | The actor loop tying it together |

pub mod attachment;
pub mod backend;
pub mod blocking;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fake;
pub mod options;
pub mod reaper;
pub mod registry;
pub mod scheme;
pub mod state;
pub mod telemetry;

pub use attachment::{AttachmentPhase, AttachmentSlot, RecoveryOutcome};
pub use backend::{AttachError, BackendError, BackendEvent, BrowserBackend, ExtensionInfo, TabId, TabInfo};
pub use connection::{Connection, ConnectionExit};
pub use error::{BlockingCause, RelayError};
pub use options::{RelayOptions, RetryPolicy, TelemetryLimits};
pub use registry::{SessionRegistry, SlotKey, TabAlreadyBound};
pub use state::{RelayContext, RelayState};
pub use telemetry::TelemetryStore;
