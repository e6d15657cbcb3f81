//! Command dispatch and the serve loop.
//!
//! The loop reads one command per line, routes it and writes one answer per
//! line. Recoverable errors and refusals are written and the loop carries
//! on; a fatal error is written, logged and ends the loop.

mod handlers;
mod router;

use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use router::{CommandRouter, Era};

use crate::compiler::ArtifactLoader;
use crate::error::QueryError;
use crate::protocol::{Command, Dialect, encode_error};
use crate::state::{ConnectionState, Options};
use crate::transport::{SharedChannel, TransportError};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Reasons the serve loop stops before the host closes the stream.
#[derive(Debug, Error)]
pub enum ServeError {
    /// A fatal error was reported to the host.
    #[error("fatal {kind}: {message}")]
    Fatal {
        /// Wire error kind.
        kind: String,
        /// Human readable reason.
        message: String,
    },
    /// Writing an answer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The connection state could not be created.
    #[error("failed to start the query server: {0}")]
    Startup(QueryError),
    /// The channel was still borrowed by a script capability.
    #[error("host channel is busy")]
    ChannelBusy,
}

/// One connection to the host.
pub struct QueryServer {
    channel: SharedChannel,
    router: CommandRouter,
    state: ConnectionState,
}

impl QueryServer {
    /// Server speaking `dialect` over `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Startup`] when the script host cannot be built.
    pub fn new(
        channel: SharedChannel,
        dialect: Dialect,
        options: Options,
        artifacts: Rc<dyn ArtifactLoader>,
    ) -> Result<Self, ServeError> {
        let state = ConnectionState::new(Rc::clone(&channel), dialect, options, artifacts)
            .map_err(ServeError::Startup)?;
        Ok(Self {
            channel,
            router: CommandRouter::new(dialect),
            state,
        })
    }

    /// Connection state, for inspection.
    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Decodes and routes one line without writing anything.
    ///
    /// # Errors
    ///
    /// Returns the error the host should be told about.
    pub fn handle(&mut self, line: Value) -> Result<Option<Value>, QueryError> {
        let command = Command::from_value(line)?;
        self.router.route(&mut self.state, command)
    }

    /// Serves commands until the host closes the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Fatal`] after reporting a fatal error to the
    /// host, and transport errors when answers cannot be written.
    pub fn serve(&mut self) -> Result<(), ServeError> {
        info!(
            target: DISPATCH_TARGET,
            version = %self.state.dialect().version(),
            "query server ready"
        );
        loop {
            let received = self
                .channel
                .try_borrow_mut()
                .map_err(|_| ServeError::ChannelBusy)?
                .receive();
            let outcome = match received {
                Ok(Some(line)) => self.handle(line),
                Ok(None) => {
                    info!(target: DISPATCH_TARGET, "host closed the stream");
                    return Ok(());
                }
                Err(TransportError::Decode(error)) => Err(error),
                Err(other) => Err(other.into_query_error()),
            };

            match outcome {
                Ok(Some(answer)) => self.write(&answer)?,
                Ok(None) => {}
                Err(error) => {
                    self.report(&error)?;
                    if let QueryError::Fatal { kind, message } = error {
                        return Err(ServeError::Fatal { kind, message });
                    }
                }
            }
        }
    }

    fn report(&self, error: &QueryError) -> Result<(), ServeError> {
        match error {
            QueryError::Fatal { kind, message } => {
                error!(target: DISPATCH_TARGET, %kind, %message, "fatal error, stopping");
            }
            QueryError::Error { kind, message } => {
                debug!(target: DISPATCH_TARGET, %kind, %message, "command failed");
            }
            QueryError::Forbidden { reason } => {
                warn!(target: DISPATCH_TARGET, %reason, "command refused");
            }
        }
        self.write(&encode_error(error, self.state.dialect()))
    }

    fn write(&self, answer: &Value) -> Result<(), ServeError> {
        self.channel
            .try_borrow_mut()
            .map_err(|_| ServeError::ChannelBusy)?
            .respond(answer)
            .map_err(ServeError::from)
    }
}
