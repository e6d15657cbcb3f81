//! Rendering commands of 0.9 hosts.
//!
//! These hosts drive lists one command at a time: `list_begin` with the view
//! head, `list_row` per row and `list_tail` at the end. Each call invokes
//! the first function registered with `add_fun` as `(head, row, req,
//! row_info)` and answers with a full response object.

use mlua::{Function, IntoLuaMulti};
use serde_json::{Value, json};
use tracing::debug;

use super::RENDER_TARGET;
use super::response::{normalize, wants_stop};
use crate::compiler::{ScriptHost, is_truthy};
use crate::error::QueryError;
use crate::protocol::Dialect;
use crate::state::ConnectionState;

#[derive(Debug, Clone, Default, PartialEq)]
struct RowInfo {
    first_key: Value,
    row_number: u64,
    prev_key: Value,
}

impl RowInfo {
    fn to_value(&self) -> Value {
        json!({
            "first_key": self.first_key,
            "row_number": self.row_number,
            "prev_key": self.prev_key,
        })
    }

    fn advance(&mut self, row: &Value) {
        let key = row.get("key").cloned().unwrap_or(Value::Null);
        if self.first_key.is_null() {
            self.first_key = key.clone();
        }
        self.prev_key = key;
        self.row_number += 1;
    }
}

/// Row bookkeeping between `list_begin` and `list_tail`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyList {
    row_info: Option<RowInfo>,
    stopped: bool,
}

fn render_call(
    host: &ScriptHost,
    function: &Function,
    args: impl IntoLuaMulti,
    dialect: Dialect,
) -> Result<Value, QueryError> {
    let returned = host
        .call(function, args)
        .map_err(|fault| fault.into_error("render_error"))?
        .into_iter()
        .next()
        .unwrap_or(mlua::Value::Nil);
    if !is_truthy(&returned) {
        return Err(QueryError::render("undefined response from render function"));
    }
    normalize(host.to_json(returned, "render_error")?, dialect)
}

/// `show_doc`: renders `doc` and answers with the response object itself.
///
/// # Errors
///
/// Returns `render_error` for failures and empty responses.
pub fn show_doc(
    host: &ScriptHost,
    function: &Function,
    doc: &Value,
    request: &Value,
    dialect: Dialect,
) -> Result<Value, QueryError> {
    render_call(
        host,
        function,
        (host.to_lua(doc)?, host.to_lua(request)?),
        dialect,
    )
}

/// `list_begin`: renders the view head.
///
/// # Errors
///
/// Returns `not_found` without a registered function and `render_error` for
/// script failures.
pub fn list_begin(
    state: &mut ConnectionState,
    head: &Value,
    request: &Value,
) -> Result<Value, QueryError> {
    let function = state.first_function()?;
    *state.legacy_list_mut() = LegacyList {
        row_info: Some(RowInfo::default()),
        stopped: false,
    };
    let host = state.host();
    let args = (
        host.to_lua(head)?,
        mlua::Value::Nil,
        host.to_lua(request)?,
        mlua::Value::Nil,
    );
    let response = render_call(host, &function, args, state.dialect())?;
    if wants_stop(&response) {
        state.legacy_list_mut().stopped = true;
    }
    Ok(response)
}

/// `list_row`: renders one row, or answers `{"stop": true}` once the
/// function asked to stop.
///
/// # Errors
///
/// Returns `render_error` before `list_begin` and for script failures.
pub fn list_row(
    state: &mut ConnectionState,
    row: &Value,
    request: &Value,
) -> Result<Value, QueryError> {
    if state.legacy_list_mut().stopped {
        debug!(target: RENDER_TARGET, "legacy list already stopped");
        return Ok(json!({ "stop": true }));
    }
    let function = state.first_function()?;
    let row_info = state
        .legacy_list_mut()
        .row_info
        .clone()
        .ok_or_else(|| QueryError::render("list_row received before list_begin"))?;

    let host = state.host();
    let args = (
        mlua::Value::Nil,
        host.to_lua(row)?,
        host.to_lua(request)?,
        host.to_lua(&row_info.to_value())?,
    );
    let response = render_call(host, &function, args, state.dialect())?;

    let list = state.legacy_list_mut();
    if let Some(info) = list.row_info.as_mut() {
        info.advance(row);
    }
    if wants_stop(&response) {
        list.stopped = true;
    }
    Ok(response)
}

/// `list_tail`: renders the end of the list and clears the bookkeeping.
///
/// # Errors
///
/// Returns `render_error` for script failures.
pub fn list_tail(state: &mut ConnectionState, request: &Value) -> Result<Value, QueryError> {
    let function = state.first_function()?;
    let finished = std::mem::take(state.legacy_list_mut());
    let host = state.host();
    let row_info = match finished.row_info {
        Some(info) => host.to_lua(&info.to_value())?,
        None => mlua::Value::Nil,
    };
    let args = (mlua::Value::Nil, mlua::Value::Nil, host.to_lua(request)?, row_info);
    render_call(host, &function, args, state.dialect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn row_info_tracks_keys_and_count() {
        let mut info = RowInfo::default();
        info.advance(&json!({"key": "a"}));
        info.advance(&json!({"key": "b"}));
        assert_eq!(
            info.to_value(),
            json!({"first_key": "a", "row_number": 2, "prev_key": "b"})
        );
    }
}
