//! Encoding of protocol lines.

use serde_json::{Value, json};

use super::Dialect;
use crate::error::QueryError;

/// Decodes one input line, ignoring trailing whitespace.
///
/// # Errors
///
/// Returns a fatal `json_decode` error for malformed JSON.
pub fn decode_line(line: &[u8]) -> Result<Value, QueryError> {
    let trimmed = trim_trailing_whitespace(line);
    serde_json::from_slice(trimmed)
        .map_err(|error| QueryError::fatal("json_decode", error.to_string()))
}

/// Wire form of an error in the given dialect.
#[must_use]
pub fn encode_error(error: &QueryError, dialect: Dialect) -> Value {
    match error {
        QueryError::Forbidden { reason } => json!({ "forbidden": reason }),
        QueryError::Fatal { kind, message } | QueryError::Error { kind, message } => {
            if dialect.tagged_arrays() {
                json!(["error", kind, message])
            } else {
                json!({ "error": kind, "reason": message })
            }
        }
    }
}

/// Wire form of a script log message in the given dialect.
#[must_use]
pub fn log_line(message: &str, dialect: Dialect) -> Value {
    if dialect.tagged_arrays() {
        json!(["log", message])
    } else {
        json!({ "log": message })
    }
}

fn trim_trailing_whitespace(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(0, |index| index + 1);
    line.get(..end).unwrap_or_default()
}
