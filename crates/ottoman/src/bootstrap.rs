//! Process bootstrap: configuration, telemetry and the serve loop.

use std::io::{BufRead, Write};
use std::rc::Rc;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::info;

use ottoman_config::Config;

use crate::compiler::{ArtifactLoader, DisabledArtifacts};
use crate::dispatch::{QueryServer, ServeError};
use crate::protocol::Dialect;
use crate::state::Options;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::JsonLines;

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigLoader {
    /// Loads the query server configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when a layer fails to parse.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Configuration and telemetry ready for serving.
#[derive(Debug)]
pub struct Bootstrapped {
    config: Config,
    telemetry: TelemetryHandle,
}

impl Bootstrapped {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Serves the host over `reader` and `writer` until it closes the stream.
    ///
    /// # Errors
    ///
    /// Returns the [`ServeError`] that ended the loop early.
    pub fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), ServeError>
    where
        R: BufRead + 'static,
        W: Write + 'static,
    {
        serve_with(&self.config, reader, writer, Rc::new(DisabledArtifacts))
    }
}

/// Loads the configuration and installs telemetry.
///
/// # Errors
///
/// Returns [`BootstrapError`] when either step fails.
pub fn bootstrap_with(loader: &dyn ConfigLoader) -> Result<Bootstrapped, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    info!(
        target: BOOTSTRAP_TARGET,
        host_version = %config.host_version(),
        reduce_limit = config.reduce_limit(),
        "configuration loaded"
    );
    Ok(Bootstrapped { config, telemetry })
}

/// Serves one connection with the given artifact loader.
///
/// # Errors
///
/// Returns the [`ServeError`] that ended the loop early.
pub fn serve_with<R, W>(
    config: &Config,
    reader: R,
    writer: W,
    artifacts: Rc<dyn ArtifactLoader>,
) -> Result<(), ServeError>
where
    R: BufRead + 'static,
    W: Write + 'static,
{
    let channel = JsonLines::shared(reader, writer);
    let dialect = Dialect::new(config.host_version());
    let mut server = QueryServer::new(channel, dialect, Options::from_config(config), artifacts)?;
    server.serve()
}
