//! Map and reduce execution.
//!
//! Every registered map function sees its own fresh copy of the document, so
//! nothing one invocation does to it is visible to the next. Map functions
//! report rows through `emit`, by returning a list of `[key, value]` pairs,
//! or both.

mod builtins;

use mlua::Function;
use serde_json::{Value, json};
use tracing::{debug, error};

pub use builtins::Builtin;

use crate::compiler::ScriptHost;
use crate::error::QueryError;
use crate::state::ConnectionState;

pub(crate) const VIEWS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::views");

const PREVIEW_CHARS: usize = 100;

/// Runs every registered map function over `doc`.
///
/// # Errors
///
/// Returns the first failure of any map function.
pub fn map_doc(state: &ConnectionState, doc: &Value) -> Result<Value, QueryError> {
    let host = state.host();
    debug!(target: VIEWS_TARGET, id = ?doc.get("_id"), "mapping document");
    let mut results = Vec::with_capacity(state.functions().len());
    for function in state.functions() {
        results.push(Value::Array(map_rows(host, function, doc)?));
    }
    Ok(Value::Array(results))
}

/// Rows one map function produces for `doc`.
///
/// # Errors
///
/// Returns `runtime_error` when the function fails or returns something
/// other than a list of pairs.
pub fn map_rows(
    host: &ScriptHost,
    function: &Function,
    doc: &Value,
) -> Result<Vec<Value>, QueryError> {
    drain_emitted(host)?;
    let called = host.to_lua(doc).and_then(|sealed| {
        host.call(function, sealed).map_err(|fault| fault.into_error("runtime_error"))
    });
    let mut rows: Vec<Value> = drain_emitted(host)?
        .into_iter()
        .map(|(key, value)| json!([key, value]))
        .collect();
    let returned = called?.into_iter().next().unwrap_or(mlua::Value::Nil);
    if returned.is_nil() {
        return Ok(rows);
    }

    match host.to_json(returned, "runtime_error")? {
        Value::Array(pairs) => {
            for pair in pairs {
                match pair {
                    Value::Array(items) if items.len() == 2 => rows.push(Value::Array(items)),
                    other => {
                        return Err(QueryError::error(
                            "runtime_error",
                            format!(
                                "map function returned a row that is not a [key, value] pair: {other}"
                            ),
                        ));
                    }
                }
            }
        }
        Value::Null => {}
        Value::Object(fields) if fields.is_empty() => {}
        other => {
            return Err(QueryError::error(
                "runtime_error",
                format!("map function must return a list of rows, got {other}"),
            ));
        }
    }
    Ok(rows)
}

fn drain_emitted(host: &ScriptHost) -> Result<Vec<(Value, Value)>, QueryError> {
    host.bindings()
        .try_borrow_mut()
        .map(|mut bindings| bindings.take_emitted())
        .map_err(|error| QueryError::fatal("script_host_error", error.to_string()))
}

/// Reduces `[[key, id], value]` rows with each source in turn.
///
/// # Errors
///
/// Returns `invalid_arguments` for malformed rows, script failures, and
/// `reduce_overflow_error` when the limit is enforced and exceeded.
pub fn reduce(
    state: &mut ConnectionState,
    sources: &[String],
    rows: Vec<Value>,
) -> Result<Value, QueryError> {
    let input = Value::Array(rows);
    let mut keys = Vec::new();
    let mut values = Vec::new();
    for row in input.as_array().map(Vec::as_slice).unwrap_or_default() {
        match row.as_array().map(Vec::as_slice) {
            Some([key, value]) => {
                keys.push(key.clone());
                values.push(value.clone());
            }
            _ => {
                return Err(QueryError::invalid_arguments(format!(
                    "reduce rows must be [key, value] pairs, got {row}"
                )));
            }
        }
    }
    run_reductions(state, sources, Some(keys), values, &input)
}

/// Combines previously reduced `values`.
///
/// # Errors
///
/// As for [`reduce`].
pub fn rereduce(
    state: &mut ConnectionState,
    sources: &[String],
    values: Vec<Value>,
) -> Result<Value, QueryError> {
    let input = Value::Array(values.clone());
    run_reductions(state, sources, None, values, &input)
}

fn run_reductions(
    state: &mut ConnectionState,
    sources: &[String],
    keys: Option<Vec<Value>>,
    values: Vec<Value>,
    input: &Value,
) -> Result<Value, QueryError> {
    let rereduce = keys.is_none();
    let keys = keys.map_or(Value::Null, Value::Array);
    let values = Value::Array(values);
    let mut reductions = Vec::with_capacity(sources.len());

    for source in sources {
        let reduced = match Builtin::parse(source) {
            Some(builtin) => {
                builtin.apply(values.as_array().map(Vec::as_slice).unwrap_or_default(), rereduce)?
            }
            None => {
                let function = state.reducer(source)?;
                let host = state.host();
                let lua_keys = if rereduce {
                    mlua::Value::Nil
                } else {
                    host.to_lua(&keys)?
                };
                let args = (lua_keys, host.to_lua(&values)?, rereduce);
                let returned = host
                    .call(&function, args)
                    .map_err(|fault| fault.into_error("runtime_error"))?;
                let first = returned.into_iter().next().unwrap_or(mlua::Value::Nil);
                host.to_json(first, "runtime_error")?
            }
        };
        reductions.push(reduced);
    }

    let output = Value::Array(reductions);
    if state.options().reduce_limit {
        check_reduce_limit(input, &output)?;
    }
    Ok(json!([true, output]))
}

fn encoded(value: &Value) -> Result<String, QueryError> {
    serde_json::to_string(value)
        .map_err(|error| QueryError::fatal("json_encode", error.to_string()))
}

/// Whether `output_len` bytes of reductions outgrow `input_len` bytes of
/// input.
#[must_use]
pub const fn exceeds_reduce_limit(input_len: usize, output_len: usize) -> bool {
    output_len > input_len.saturating_mul(2)
}

fn check_reduce_limit(input: &Value, output: &Value) -> Result<(), QueryError> {
    let input_line = encoded(input)?;
    let output_line = encoded(output)?;
    if !exceeds_reduce_limit(input_line.len(), output_line.len()) {
        return Ok(());
    }
    let preview: String = output_line.chars().take(PREVIEW_CHARS).collect();
    let message = format!(
        "Reduce output must shrink more rapidly: Current output: `{preview}`... (first {PREVIEW_CHARS} of {} bytes)",
        output_line.len()
    );
    error!(
        target: VIEWS_TARGET,
        input_bytes = input_line.len(),
        output_bytes = output_line.len(),
        "reduce output too large"
    );
    Err(QueryError::error("reduce_overflow_error", message))
}
