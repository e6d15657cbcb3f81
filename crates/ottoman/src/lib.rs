//! Out-of-process query server for a document database.
//!
//! The database host starts the `ottoman` binary and talks to it over
//! stdin/stdout, one JSON document per line. It registers map and reduce
//! functions, asks for documents to be mapped and rows to be reduced, and,
//! through design documents, runs show, list, update, filter and validation
//! functions written in Lua.
//!
//! Exactly one command is in flight at any time. Per-connection state lives
//! in [`state::ConnectionState`] and is threaded through every dispatch; the
//! only long-lived resources are the embedded Lua interpreter and the caches
//! of compiled functions and loaded modules.
//!
//! ## Error taxonomy
//!
//! Every failure is one of three severities ([`QueryError`]):
//!
//! 1. **Fatal**: written to the host, after which the process exits.
//! 2. **Error**: written to the host; the connection carries on.
//! 3. **Forbidden**: a validation refusal, written as `{"forbidden": ...}`.
//!
//! The wire encoding of errors and log lines depends on the host version; see
//! [`protocol::Dialect`].

pub mod bootstrap;
pub mod compiler;
pub mod ddoc;
pub mod dispatch;
pub mod error;
pub mod filters;
pub mod mime;
pub mod protocol;
pub mod render;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod validate;
pub mod views;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, SystemConfigLoader, bootstrap_with, serve_with,
};
pub use dispatch::{QueryServer, ServeError};
pub use error::{QueryError, Severity};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
