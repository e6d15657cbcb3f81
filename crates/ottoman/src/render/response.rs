//! Normalisation of the values design functions return as HTTP responses.

use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::protocol::Dialect;

const CONTENT_KEYS: &[&str] = &["json", "body", "base64"];

/// Turns a bare string into `{"body": string}` and validates an object.
///
/// Of `json`, `body` and `base64` only the one appearing last survives.
/// Lua tables keep no assignment order and come back with sorted keys, so
/// for script responses `json` beats `body`, which beats `base64`. The
/// result lists `code`, the content key, `headers` and `stop` in that order;
/// `stop` is kept only when it is `true`.
///
/// # Errors
///
/// Returns `render_error` for unrecognised keys and for values that are
/// neither strings nor objects. `json` and `base64` are unrecognised for
/// hosts older than 0.10.
pub fn normalize(value: Value, dialect: Dialect) -> Result<Value, QueryError> {
    let fields = match value {
        Value::String(body) => return Ok(body_response(body)),
        Value::Object(fields) => fields,
        other => {
            return Err(QueryError::render(format!(
                "Invalid response object {other}"
            )));
        }
    };

    let mut code = None;
    let mut content: Option<(String, Value)> = None;
    let mut headers = None;
    let mut stop = false;
    for (key, field) in fields {
        match key.as_str() {
            "code" => code = Some(field),
            "headers" => headers = Some(field),
            "stop" => stop = field.as_bool().unwrap_or(false),
            "body" => content = Some((key, field)),
            "json" | "base64" if dialect.rich_responses() => content = Some((key, field)),
            _ => {
                return Err(QueryError::render(format!(
                    "Invalid response key: `{key}`"
                )));
            }
        }
    }

    let mut response = Map::new();
    if let Some(code) = code {
        response.insert("code".to_owned(), code);
    }
    if let Some((key, field)) = content {
        response.insert(key, field);
    }
    if let Some(headers) = headers {
        response.insert("headers".to_owned(), headers);
    }
    if stop {
        response.insert("stop".to_owned(), Value::Bool(true));
    }
    Ok(Value::Object(response))
}

/// `{"body": body}`.
#[must_use]
pub fn body_response(body: String) -> Value {
    let mut response = Map::new();
    response.insert("body".to_owned(), Value::String(body));
    Value::Object(response)
}

/// Whether a normalised response asked the stream to stop.
#[must_use]
pub fn wants_stop(response: &Value) -> bool {
    response
        .get("stop")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Ensures `response` has a `headers` object and sets `Content-Type` unless
/// one is already present.
pub fn apply_content_type(response: &mut Map<String, Value>, content_type: Option<&str>) {
    let headers = response
        .entry("headers")
        .or_insert_with(|| Value::Object(Map::new()));
    if !headers.is_object() {
        *headers = Value::Object(Map::new());
    }
    let (Some(content_type), Value::Object(headers)) = (content_type, headers) else {
        return;
    };
    if !headers.contains_key("Content-Type") {
        headers.insert(
            "Content-Type".to_owned(),
            Value::String(content_type.to_owned()),
        );
    }
}

/// Text a response contributes to a chunk stream.
#[must_use]
pub fn content_text(response: &Value) -> Option<String> {
    match response {
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => CONTENT_KEYS.iter().find_map(|key| match fields.get(*key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::protocol::ProtocolVersion;

    fn current() -> Dialect {
        Dialect::new(ProtocolVersion::new(1, 2, 0))
    }

    #[rstest]
    fn bare_string_becomes_body() {
        assert_eq!(normalize(json!("hello"), current()).expect("ok"), json!({"body": "hello"}));
    }

    #[rstest]
    fn last_content_key_wins() {
        let json_last: Value =
            serde_json::from_str(r#"{"body": "b", "json": {"a": 1}}"#).expect("json");
        let body_last: Value =
            serde_json::from_str(r#"{"json": {"a": 1}, "body": "b"}"#).expect("json");

        assert_eq!(normalize(json_last, current()).expect("ok"), json!({"json": {"a": 1}}));
        assert_eq!(normalize(body_last, current()).expect("ok"), json!({"body": "b"}));
    }

    #[rstest]
    fn unknown_keys_are_rejected() {
        let error =
            normalize(json!({"body": "x", "colour": "red"}), current()).expect_err("bad key");
        assert_eq!(error.kind(), "render_error");
        assert_eq!(error.message(), "Invalid response key: `colour`");
    }

    #[rstest]
    fn rich_keys_need_a_newer_host() {
        let dialect = Dialect::new(ProtocolVersion::new(0, 9, 0));
        let error = normalize(json!({"json": {}}), dialect).expect_err("too old");
        assert_eq!(error.kind(), "render_error");
    }

    #[rstest]
    #[case::stop_true(json!({"body": "x", "stop": true}), json!({"body": "x", "stop": true}))]
    #[case::stop_false(json!({"body": "x", "stop": false}), json!({"body": "x"}))]
    #[case::code_and_headers(
        json!({"headers": {"X": "1"}, "code": 201}),
        json!({"code": 201, "headers": {"X": "1"}})
    )]
    fn canonical_shape(#[case] input: Value, #[case] expected: Value) {
        assert_eq!(normalize(input, current()).expect("ok"), expected);
    }

    #[rstest]
    #[case::number(json!(3))]
    #[case::array(json!(["body"]))]
    fn non_objects_are_rejected(#[case] input: Value) {
        assert_eq!(normalize(input, current()).expect_err("bad").kind(), "render_error");
    }

    #[rstest]
    fn content_type_is_added_once() {
        let mut response = Map::new();
        apply_content_type(&mut response, Some("text/html"));
        apply_content_type(&mut response, Some("text/plain"));
        assert_eq!(
            Value::Object(response),
            json!({"headers": {"Content-Type": "text/html"}})
        );
    }
}
