//! Concrete collaborators for the relay core.
//!
//! - [`CdpBackend`]: [`relay::BrowserBackend`] over the Chrome DevTools Protocol
//! - [`discovery`]: locating the browser WebSocket through `/json/version`
//! - [`transport`]: WebSocket link to the automation server

pub mod cdp;
pub mod discovery;
pub mod error;
pub mod transport;

pub use cdp::CdpBackend;
pub use discovery::{BrowserEndpoint, CdpVersionInfo, fetch_version};
pub use error::{Result, RuntimeError};
pub use transport::{ServerLink, connect_server};
