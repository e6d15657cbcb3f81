//! Document update validation.

use mlua::{Function, Variadic};
use serde_json::Value;
use tracing::debug;

use crate::compiler::{ScriptFault, ScriptHost};
use crate::error::QueryError;
use crate::protocol::Dialect;

pub(crate) const VALIDATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::validate");

/// Arguments of one validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationInput {
    /// Document about to be written.
    pub new_doc: Value,
    /// Stored revision, `null` for new documents.
    pub old_doc: Value,
    /// User context of the writer.
    pub userctx: Value,
    /// Database security object.
    pub secobj: Value,
}

/// Runs a `validate_doc_update` function, answering `1` on success.
///
/// A failed `assert` counts as a refusal with the assertion message as the
/// reason. The security object is passed from 0.11.1 on.
///
/// # Errors
///
/// Returns [`QueryError::Forbidden`] for refusals, the raised error for
/// explicit `Error`/`FatalError` calls and `runtime_error` otherwise.
pub fn validate(
    host: &ScriptHost,
    function: &Function,
    input: &ValidationInput,
    dialect: Dialect,
) -> Result<Value, QueryError> {
    let mut args = vec![
        host.to_lua(&input.new_doc)?,
        host.to_lua(&input.old_doc)?,
        host.to_lua(&input.userctx)?,
    ];
    if dialect.passes_security_object() {
        args.push(host.to_lua(&input.secobj)?);
    }

    match host.call(function, args.into_iter().collect::<Variadic<_>>()) {
        Ok(_) => Ok(Value::from(1)),
        Err(
            ScriptFault::Raised(QueryError::Forbidden { reason }) | ScriptFault::Assertion(reason),
        ) => {
            debug!(
                target: VALIDATE_TARGET,
                user = %input.userctx,
                %reason,
                "update refused"
            );
            Err(QueryError::forbidden(reason))
        }
        Err(fault) => Err(fault.into_error("runtime_error")),
    }
}
