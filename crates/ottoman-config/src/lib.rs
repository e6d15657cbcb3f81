//! Shared configuration for the ottoman query server.
//!
//! Values are layered by `ortho_config`: built-in defaults, an optional
//! configuration file, `OTTOMAN_*` environment variables and finally
//! command-line flags. The query server reads the result once at startup;
//! the host may later adjust a subset through the `reset` command, which is
//! handled by the server itself.

mod defaults;
mod logging;
mod version;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_HOST_VERSION, DEFAULT_LOG_FILTER, default_allow_get_update,
    default_enable_artifacts, default_host_version, default_log_filter,
    default_log_filter_string, default_log_format, default_reduce_limit,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use version::{ProtocolVersion, VersionParseError};

/// Resolved query server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "OTTOMAN")]
pub struct Config {
    /// `tracing` filter expression for diagnostics.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Diagnostic output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// File receiving diagnostics instead of stderr.
    #[serde(default)]
    pub log_file: Option<Utf8PathBuf>,
    /// Version of the host database driving this process.
    #[serde(default = "default_host_version")]
    #[ortho_config(default = default_host_version())]
    pub host_version: ProtocolVersion,
    /// Whether oversized reduce output is rejected.
    #[serde(default = "default_reduce_limit")]
    #[ortho_config(default = default_reduce_limit())]
    pub reduce_limit: bool,
    /// Whether update functions accept `GET` requests.
    #[serde(default = "default_allow_get_update")]
    #[ortho_config(default = default_allow_get_update())]
    pub allow_get_update: bool,
    /// Whether packaged module artifacts are handed to the artifact loader.
    #[serde(default = "default_enable_artifacts")]
    #[ortho_config(default = default_enable_artifacts())]
    pub enable_artifacts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            log_file: None,
            host_version: default_host_version(),
            reduce_limit: default_reduce_limit(),
            allow_get_update: default_allow_get_update(),
            enable_artifacts: default_enable_artifacts(),
        }
    }
}

impl Config {
    /// Filter expression applied to diagnostics.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format for diagnostics.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Optional diagnostics file.
    #[must_use]
    pub fn log_file(&self) -> Option<&Utf8PathBuf> {
        self.log_file.as_ref()
    }

    /// Host version selecting the protocol dialect.
    #[must_use]
    pub const fn host_version(&self) -> ProtocolVersion {
        self.host_version
    }

    /// Whether reduce output size checks are enforced.
    #[must_use]
    pub const fn reduce_limit(&self) -> bool {
        self.reduce_limit
    }

    /// Whether update functions may serve `GET` requests.
    #[must_use]
    pub const fn allow_get_update(&self) -> bool {
        self.allow_get_update
    }

    /// Whether packaged module artifacts are loaded.
    #[must_use]
    pub const fn enable_artifacts(&self) -> bool {
        self.enable_artifacts
    }
}
