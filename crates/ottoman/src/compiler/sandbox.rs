//! The capability table every compiled function falls back to.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use mlua::{Function, Lua, LuaSerdeExt, MultiValue, Table, Variadic};
use serde_json::Map;
use tracing::debug;

use super::bindings::Bindings;
use super::convert::{is_truthy, to_json, to_lua, to_text};
use super::{COMPILER_TARGET, ScriptSignal, raise};
use crate::error::QueryError;
use crate::protocol::{Dialect, log_line};
use crate::transport::{Channel, SharedChannel};

/// Base library entries scripts may use. Anything touching the file system,
/// the process or bytecode loading stays out.
const SAFE_GLOBALS: &[&str] = &[
    "_VERSION",
    "error",
    "getmetatable",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "rawget",
    "rawlen",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
    "xpcall",
];

/// Standard libraries handed to scripts behind read-only proxies.
const SAFE_LIBRARIES: &[&str] = &["math", "string", "table", "utf8"];

const SAFE_OS: &[&str] = &["clock", "date", "time"];

pub(super) fn build(
    lua: &Lua,
    bindings: &Rc<RefCell<Bindings>>,
    channel: &SharedChannel,
    dialect: Dialect,
) -> mlua::Result<Table> {
    let globals = lua.globals();
    let sandbox = lua.create_table()?;
    for name in SAFE_GLOBALS {
        sandbox.set(*name, globals.get::<mlua::Value>(*name)?)?;
    }

    let mut frozen = Vec::with_capacity(SAFE_LIBRARIES.len() + 2);
    for name in SAFE_LIBRARIES {
        let proxy = read_only(lua, *name, globals.get(*name)?)?;
        sandbox.set(*name, proxy.clone())?;
        frozen.push(proxy);
    }

    let os: Table = globals.get("os")?;
    let safe_os = lua.create_table()?;
    for name in SAFE_OS {
        safe_os.set(*name, os.get::<mlua::Value>(*name)?)?;
    }
    let os_proxy = read_only(lua, "os", safe_os)?;
    sandbox.set("os", os_proxy.clone())?;
    frozen.push(os_proxy);

    let json = read_only(lua, "json", json_library(lua)?)?;
    sandbox.set("json", json.clone())?;
    frozen.push(json);

    sandbox.set("rawset", rawset_capability(lua, frozen)?)?;
    sandbox.set("log", log_capability(lua, channel, dialect)?)?;
    sandbox.set("assert", assert_capability(lua)?)?;
    sandbox.set(
        "Error",
        error_constructor(lua, |kind, message| QueryError::error(kind, message))?,
    )?;
    sandbox.set(
        "FatalError",
        error_constructor(lua, |kind, message| QueryError::fatal(kind, message))?,
    )?;
    sandbox.set(
        "Forbidden",
        lua.create_function(|lua, reason: mlua::Value| -> mlua::Result<()> {
            Err(raise(QueryError::forbidden(to_text(lua, reason)?)))
        })?,
    )?;

    sandbox.set("emit", emit_capability(lua, bindings)?)?;
    sandbox.set("register_type", register_type_capability(lua, bindings)?)?;
    sandbox.set("provides", provides_capability(lua, bindings)?)?;
    sandbox.set("start", start_capability(lua, bindings)?)?;
    sandbox.set("send", send_capability(lua, bindings)?)?;
    sandbox.set("get_row", get_row_capability(lua, bindings, channel)?)?;

    Ok(sandbox)
}

fn borrow(bindings: &Rc<RefCell<Bindings>>) -> mlua::Result<RefMut<'_, Bindings>> {
    bindings.try_borrow_mut().map_err(mlua::Error::external)
}

/// Wraps `library` in an empty table that reads through to it and refuses
/// writes. The proxy's metatable is hidden from scripts.
fn read_only(lua: &Lua, name: &'static str, library: Table) -> mlua::Result<Table> {
    let meta = lua.create_table()?;
    meta.set(
        "__newindex",
        lua.create_function(move |_, _: MultiValue| -> mlua::Result<()> {
            Err(mlua::Error::runtime(format!(
                "attempt to modify read-only library `{name}`"
            )))
        })?,
    )?;
    let next: Function = lua.globals().get("next")?;
    let entries = library.clone();
    meta.set(
        "__pairs",
        lua.create_function(move |_, _: MultiValue| {
            Ok((next.clone(), entries.clone(), mlua::Value::Nil))
        })?,
    )?;
    meta.set("__index", library)?;
    meta.set("__metatable", false)?;

    let proxy = lua.create_table()?;
    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

/// `rawset` that cannot bypass the read-only library proxies.
fn rawset_capability(lua: &Lua, frozen: Vec<Table>) -> mlua::Result<Function> {
    lua.create_function(
        move |_, (table, key, value): (Table, mlua::Value, mlua::Value)| {
            if frozen
                .iter()
                .any(|proxy| proxy.to_pointer() == table.to_pointer())
            {
                return Err(mlua::Error::runtime(
                    "attempt to modify a read-only library",
                ));
            }
            table.raw_set(key, value)?;
            Ok(table)
        },
    )
}

fn json_library(lua: &Lua) -> mlua::Result<Table> {
    let json = lua.create_table()?;
    json.set(
        "encode",
        lua.create_function(|lua, value: mlua::Value| {
            let document = to_json(lua, value)?;
            serde_json::to_string(&document).map_err(mlua::Error::external)
        })?,
    )?;
    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let document: serde_json::Value =
                serde_json::from_str(&text).map_err(mlua::Error::external)?;
            to_lua(lua, &document)
        })?,
    )?;
    json.set("null", lua.null())?;
    Ok(json)
}

fn log_capability(lua: &Lua, channel: &SharedChannel, dialect: Dialect) -> mlua::Result<Function> {
    let channel = Rc::clone(channel);
    lua.create_function(move |lua, message: mlua::Value| {
        let text = to_text(lua, message)?;
        debug!(target: COMPILER_TARGET, message = %text, "script log");
        channel
            .try_borrow_mut()
            .map_err(mlua::Error::external)?
            .respond(&log_line(&text, dialect))
            .map_err(|error| raise(error.into_query_error()))
    })
}

fn assert_capability(lua: &Lua) -> mlua::Result<Function> {
    lua.create_function(|lua, args: MultiValue| {
        if args.front().is_some_and(is_truthy) {
            return Ok(args);
        }
        let message = match args.get(1) {
            Some(mlua::Value::Nil) | None => "assertion failed!".to_owned(),
            Some(other) => to_text(lua, other.clone())?,
        };
        Err(mlua::Error::external(ScriptSignal::Assertion { message }))
    })
}

fn error_constructor(
    lua: &Lua,
    build: fn(String, String) -> QueryError,
) -> mlua::Result<Function> {
    lua.create_function(
        move |lua, (kind, message): (mlua::Value, mlua::Value)| -> mlua::Result<()> {
            Err(raise(build(to_text(lua, kind)?, to_text(lua, message)?)))
        },
    )
}

fn emit_capability(lua: &Lua, bindings: &Rc<RefCell<Bindings>>) -> mlua::Result<Function> {
    let bindings = Rc::clone(bindings);
    lua.create_function(move |lua, (key, value): (mlua::Value, mlua::Value)| {
        let row_key = to_json(lua, key)?;
        let row_value = to_json(lua, value)?;
        borrow(&bindings)?.emit(row_key, row_value);
        Ok(())
    })
}

fn register_type_capability(
    lua: &Lua,
    bindings: &Rc<RefCell<Bindings>>,
) -> mlua::Result<Function> {
    let bindings = Rc::clone(bindings);
    lua.create_function(move |_, (key, types): (String, Variadic<String>)| {
        borrow(&bindings)?
            .mime_mut()
            .register(&key, types.iter().cloned().collect());
        Ok(())
    })
}

fn provides_capability(lua: &Lua, bindings: &Rc<RefCell<Bindings>>) -> mlua::Result<Function> {
    let bindings = Rc::clone(bindings);
    lua.create_function(move |_, (key, handler): (String, Function)| {
        borrow(&bindings)?
            .render_frame("provides")
            .map_err(raise)?
            .provide(key, handler);
        Ok(())
    })
}

fn start_capability(lua: &Lua, bindings: &Rc<RefCell<Bindings>>) -> mlua::Result<Function> {
    let bindings = Rc::clone(bindings);
    lua.create_function(move |lua, head: Option<Table>| {
        let fields = match head {
            Some(table) => match to_json(lua, mlua::Value::Table(table))? {
                serde_json::Value::Object(fields) => fields,
                _ => Map::new(),
            },
            None => Map::new(),
        };
        borrow(&bindings)?
            .render_frame("start")
            .and_then(|frame| frame.stream.start(fields))
            .map_err(raise)
    })
}

fn send_capability(lua: &Lua, bindings: &Rc<RefCell<Bindings>>) -> mlua::Result<Function> {
    let bindings = Rc::clone(bindings);
    lua.create_function(move |lua, chunk: mlua::Value| {
        let text = to_text(lua, chunk)?;
        borrow(&bindings)?
            .render_frame("send")
            .and_then(|frame| frame.stream.send(text))
            .map_err(raise)
    })
}

fn get_row_capability(
    lua: &Lua,
    bindings: &Rc<RefCell<Bindings>>,
    channel: &SharedChannel,
) -> mlua::Result<Function> {
    let bindings = Rc::clone(bindings);
    let channel = Rc::clone(channel);
    lua.create_function(move |lua, ()| {
        let row = {
            let mut state = borrow(&bindings)?;
            let mut stream = channel.try_borrow_mut().map_err(mlua::Error::external)?;
            let sink: &mut dyn Channel = &mut *stream;
            state
                .render_frame("get_row")
                .and_then(|frame| frame.stream.next_row(sink))
                .map_err(raise)?
        };
        match row {
            Some(document) => to_lua(lua, &document),
            None => Ok(mlua::Value::Nil),
        }
    })
}
