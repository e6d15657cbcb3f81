//! Show functions: one document, one response.

use mlua::Function;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::response::{apply_content_type, normalize};
use super::stream::StreamState;
use super::{RENDER_TARGET, chosen_provider};
use crate::compiler::{RenderFrame, RenderScope, ScriptFault, ScriptHost, is_truthy};
use crate::error::QueryError;
use crate::protocol::Dialect;

/// Renders `doc` with a show function, answering `["resp", response]`.
///
/// Chunks passed to `send` are prefixed to the body and the head given to
/// `start` contributes headers. When the function registered providers the
/// negotiated one produces the response and its media type becomes the
/// `Content-Type`.
///
/// # Errors
///
/// Returns `not_found` when the function fails on a missing document
/// requested by path, `render_error` for other failures and malformed
/// responses, and `not_acceptable` when no provider fits the request.
pub fn show(
    host: &ScriptHost,
    function: &Function,
    doc: &Value,
    request: &Value,
    dialect: Dialect,
) -> Result<Value, QueryError> {
    let scope = RenderScope::enter(host.bindings(), RenderFrame::new(StreamState::for_show()))?;
    let fail = |fault: ScriptFault| show_failure(fault, doc, request);

    let returned = host
        .call(function, (host.to_lua(doc)?, host.to_lua(request)?))
        .map_err(fail)?
        .into_iter()
        .next()
        .unwrap_or(mlua::Value::Nil);
    let mut response = if is_truthy(&returned) {
        host.to_json(returned, "render_error")?
    } else {
        Value::Object(Map::new())
    };

    let mut provided_type: Option<Option<String>> = None;
    if let Some((negotiation, handler)) = chosen_provider(host, &scope, request)? {
        let provided = host
            .call(&handler, ())
            .map_err(fail)?
            .into_iter()
            .next()
            .unwrap_or(mlua::Value::Nil);
        response = host.to_json(provided, "render_error")?;
        provided_type = Some(negotiation.content_type);
    }

    let (chunks, head) = scope.finish()?.stream.into_show_parts();
    let mut fields = into_fields(response)?;
    if !chunks.is_empty() {
        merge_chunks(&mut fields, chunks, head);
    }
    if let Some(content_type) = provided_type {
        apply_content_type(&mut fields, content_type.as_deref());
    }

    debug!(target: RENDER_TARGET, "show rendered");
    Ok(json!(["resp", normalize(Value::Object(fields), dialect)?]))
}

fn show_failure(fault: ScriptFault, doc: &Value, request: &Value) -> QueryError {
    let is_doc_path = request
        .get("path")
        .and_then(Value::as_array)
        .is_some_and(|segments| segments.len() > 5);
    match fault {
        ScriptFault::Raised(error) => error,
        ScriptFault::Assertion(_) | ScriptFault::Runtime(_) if doc.is_null() && is_doc_path => {
            QueryError::error("not_found", "document not found")
        }
        other => other.into_error("render_error"),
    }
}

fn into_fields(response: Value) -> Result<Map<String, Value>, QueryError> {
    match response {
        Value::Object(fields) => Ok(fields),
        Value::String(body) => {
            let mut fields = Map::new();
            fields.insert("body".to_owned(), Value::String(body));
            Ok(fields)
        }
        Value::Null => Ok(Map::new()),
        other => Err(QueryError::render(format!("Invalid response object {other}"))),
    }
}

fn merge_chunks(fields: &mut Map<String, Value>, chunks: Vec<String>, head: Map<String, Value>) {
    for (key, value) in head {
        match (key.as_str(), value) {
            ("headers", Value::Object(extra)) => {
                let headers = fields
                    .entry("headers")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(headers) = headers {
                    headers.extend(extra);
                }
            }
            ("code", code) => {
                fields.entry("code").or_insert(code);
            }
            _ => {}
        }
    }

    let body = fields
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let merged = format!("{}{body}", chunks.concat());
    fields.insert("body".to_owned(), Value::String(merged));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn chunks_prefix_the_body_and_head_adds_headers() {
        let mut fields = Map::new();
        fields.insert("body".to_owned(), json!("tail"));
        let mut head = Map::new();
        head.insert("headers".to_owned(), json!({"X-Rendered": "yes"}));
        head.insert("code".to_owned(), json!(202));

        merge_chunks(&mut fields, vec!["a".to_owned(), "b".to_owned()], head);
        assert_eq!(
            Value::Object(fields),
            json!({"body": "abtail", "headers": {"X-Rendered": "yes"}, "code": 202})
        );
    }

    #[test]
    fn script_failures_on_missing_documents_are_not_found() {
        let request = json!({"path": ["db", "_design", "app", "_show", "s", "missing"]});
        let error = show_failure(ScriptFault::Runtime("boom".to_owned()), &Value::Null, &request);
        assert_eq!(error.kind(), "not_found");

        let short = json!({"path": ["db", "_design", "app", "_show", "s"]});
        let error = show_failure(ScriptFault::Runtime("boom".to_owned()), &Value::Null, &short);
        assert_eq!(error.kind(), "render_error");
    }
}
