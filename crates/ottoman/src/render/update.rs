//! Update functions.

use mlua::Function;
use serde_json::{Value, json};
use tracing::{debug, error};

use super::RENDER_TARGET;
use super::response::normalize;
use crate::compiler::ScriptHost;
use crate::error::QueryError;
use crate::protocol::Dialect;

/// Runs an update function, answering `["up", doc, response]`.
///
/// The function returns the document to write (or `nil` for none) and the
/// response, either as two values or as one two-element list.
///
/// # Errors
///
/// Returns `method_not_allowed` for `GET` unless `allow_get` is set,
/// `render_error` for script failures and malformed results, including a
/// returned document that lost the `_id` of an existing one.
pub fn update(
    host: &ScriptHost,
    function: &Function,
    doc: &Value,
    request: &Value,
    allow_get: bool,
    dialect: Dialect,
) -> Result<Value, QueryError> {
    if !allow_get && request.get("method").and_then(Value::as_str) == Some("GET") {
        error!(target: RENDER_TARGET, "GET request to an update function");
        return Err(QueryError::error(
            "method_not_allowed",
            "Method `GET` is not allowed for update functions",
        ));
    }

    let returned = host
        .call(function, (host.to_lua(doc)?, host.to_lua(request)?))
        .map_err(|fault| fault.into_error("render_error"))?;
    let mut values = returned.into_iter();
    let first = values.next().unwrap_or(mlua::Value::Nil);
    let second = values.next().unwrap_or(mlua::Value::Nil);

    let (new_doc, response) = if second.is_nil() {
        match host.to_json(first, "render_error")? {
            Value::Array(pair) if pair.len() == 2 => {
                let mut pair = pair.into_iter();
                (
                    pair.next().unwrap_or(Value::Null),
                    pair.next().unwrap_or(Value::Null),
                )
            }
            other => {
                return Err(QueryError::render(format!(
                    "update function must return a document and a response, got {other}"
                )));
            }
        }
    } else {
        (
            host.to_json(first, "render_error")?,
            host.to_json(second, "render_error")?,
        )
    };

    if !doc.is_null() && new_doc.is_object() && new_doc.get("_id").is_none() {
        return Err(QueryError::render(
            "document returned by update function has no `_id`",
        ));
    }

    debug!(target: RENDER_TARGET, write = !new_doc.is_null(), "update rendered");
    Ok(json!(["up", new_doc, normalize(response, dialect)?]))
}
