//! Changes-feed filters.

use mlua::{Function, Variadic};
use serde_json::{Value, json};
use tracing::debug;

use crate::compiler::{ScriptHost, is_truthy};
use crate::error::QueryError;
use crate::protocol::Dialect;
use crate::views::map_rows;

pub(crate) const FILTERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::filters");

/// Runs a filter function over `docs`, answering `[true, [bool, ...]]`.
///
/// Hosts older than 0.11.1 pass the user context as a third argument. When
/// such a host leaves it out it is taken from `request.userCtx`.
///
/// # Errors
///
/// Returns `runtime_error` when the function fails; explicit errors raised
/// by the function pass through unchanged.
pub fn filter_docs(
    host: &ScriptHost,
    function: &Function,
    docs: &[Value],
    request: &Value,
    userctx: Option<Value>,
    dialect: Dialect,
) -> Result<Value, QueryError> {
    let userctx = dialect.passes_filter_userctx().then(|| {
        userctx.unwrap_or_else(|| request.get("userCtx").cloned().unwrap_or(Value::Null))
    });
    debug!(
        target: FILTERS_TARGET,
        docs = docs.len(),
        legacy = userctx.is_some(),
        "filtering documents"
    );

    let mut passed = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut args = vec![host.to_lua(doc)?, host.to_lua(request)?];
        if let Some(context) = &userctx {
            args.push(host.to_lua(context)?);
        }
        let returned = host
            .call(function, args.into_iter().collect::<Variadic<_>>())
            .map_err(|fault| fault.into_error("runtime_error"))?;
        passed.push(returned.front().is_some_and(is_truthy));
    }
    Ok(json!([true, passed]))
}

/// Uses a map function as a filter: a document passes when the function
/// produces at least one row for it.
///
/// # Errors
///
/// Returns `runtime_error` when the map function fails.
pub fn filter_view(
    host: &ScriptHost,
    function: &Function,
    docs: &[Value],
) -> Result<Value, QueryError> {
    let mut passed = Vec::with_capacity(docs.len());
    for doc in docs {
        passed.push(!map_rows(host, function, doc)?.is_empty());
    }
    Ok(json!([true, passed]))
}
