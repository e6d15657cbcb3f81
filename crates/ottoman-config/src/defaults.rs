use crate::logging::LogFormat;
use crate::version::ProtocolVersion;

/// Default diagnostic filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Host version assumed when none is configured: newest behaviour everywhere.
pub const DEFAULT_HOST_VERSION: ProtocolVersion = ProtocolVersion::new(999, 999, 999);

/// Default diagnostic filter expression.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default diagnostic format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default host version.
pub fn default_host_version() -> ProtocolVersion {
    DEFAULT_HOST_VERSION
}

/// Reduce output size checks are enforced unless switched off.
pub fn default_reduce_limit() -> bool {
    true
}

/// Update functions refuse `GET` requests unless switched on.
pub fn default_allow_get_update() -> bool {
    false
}

/// Packaged module artifacts are ignored unless switched on.
pub fn default_enable_artifacts() -> bool {
    false
}
