//! Conversions between JSON documents and Lua values.
//!
//! JSON `null` becomes the `json.null` light userdata so that it survives a
//! round trip; arrays carry the array metatable for the same reason. Keys are
//! sorted when converting back so output is deterministic.

use std::num::FpCategory;

use mlua::{DeserializeOptions, Lua, LuaSerdeExt};
use serde_json::Value;

pub(crate) fn to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    lua.to_value(value)
}

pub(crate) fn to_json(lua: &Lua, value: mlua::Value) -> mlua::Result<Value> {
    lua.from_value_with(value, DeserializeOptions::new().sort_keys(true))
}

/// Text of a value passed to `send`, `log` or an error constructor.
pub(crate) fn to_text(lua: &Lua, value: mlua::Value) -> mlua::Result<String> {
    match value {
        mlua::Value::Nil => Ok(String::new()),
        mlua::Value::String(text) => Ok(text.to_string_lossy().to_string()),
        mlua::Value::Integer(number) => Ok(number.to_string()),
        mlua::Value::Number(number) => Ok(number.to_string()),
        mlua::Value::Boolean(flag) => Ok(flag.to_string()),
        other => {
            let json = to_json(lua, other)?;
            serde_json::to_string(&json).map_err(mlua::Error::external)
        }
    }
}

/// Truthiness used when a script's answer must become a boolean.
///
/// `nil`, `false`, `json.null`, zero, NaN and the empty string are false;
/// every other value, empty tables included, is true.
#[must_use]
pub fn is_truthy(value: &mlua::Value) -> bool {
    match value {
        mlua::Value::Nil => false,
        mlua::Value::Boolean(flag) => *flag,
        mlua::Value::LightUserData(data) => !data.0.is_null(),
        mlua::Value::Integer(number) => *number != 0,
        mlua::Value::Number(number) => {
            !matches!(number.classify(), FpCategory::Nan | FpCategory::Zero)
        }
        mlua::Value::String(text) => !text.as_bytes().is_empty(),
        _ => true,
    }
}
