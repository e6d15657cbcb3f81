//! Script host: turns Lua snippets from design documents into callables.
//!
//! Every compiled function runs in its own environment table whose
//! `__index` falls back to a shared sandbox. The sandbox exposes a safe
//! subset of the Lua standard library behind read-only proxies, plus the
//! capabilities scripts use to talk to the engine (`log`, `emit`, `send`,
//! `get_row`, `require` and the error constructors). `reset` rebuilds it.
//!
//! Failures cross the Lua boundary as [`ScriptSignal`] values wrapped in
//! `mlua` external errors, and are recovered with [`ScriptFault::from_lua`]
//! once a call returns.

mod bindings;
mod convert;
mod modules;
mod sandbox;

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Table};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::QueryError;
use crate::protocol::Dialect;
use crate::transport::SharedChannel;

pub use bindings::{Bindings, RenderFrame, RenderScope};
pub use convert::is_truthy;
pub use modules::{ARTIFACT_PREFIX, ArtifactLoader, DisabledArtifacts, Linker, resolve_path};

#[cfg(test)]
pub use modules::MockArtifactLoader;

pub(crate) const COMPILER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::compiler");

/// Error value raised from engine callbacks into running scripts.
#[derive(Debug, Error)]
pub enum ScriptSignal {
    /// One of the three wire severities, raised explicitly.
    #[error("{0}")]
    Raised(QueryError),
    /// A failed `assert`.
    #[error("{message}")]
    Assertion {
        /// Assertion message.
        message: String,
    },
}

/// Classified failure of a script call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptFault {
    /// The script (or an engine callback) raised a wire error.
    Raised(QueryError),
    /// The script failed an `assert`.
    Assertion(String),
    /// Any other runtime failure.
    Runtime(String),
}

impl ScriptFault {
    /// Classifies an error returned from a Lua call.
    #[must_use]
    pub fn from_lua(error: &mlua::Error) -> Self {
        match find_signal(error) {
            Some(ScriptSignal::Raised(raised)) => Self::Raised(raised.clone()),
            Some(ScriptSignal::Assertion { message }) => Self::Assertion(message.clone()),
            None => Self::Runtime(fault_message(error)),
        }
    }

    /// Maps the fault onto the wire taxonomy, reporting plain failures
    /// (assertions included) under `kind`.
    #[must_use]
    pub fn into_error(self, kind: &str) -> QueryError {
        match self {
            Self::Raised(error) => error,
            Self::Assertion(message) | Self::Runtime(message) => QueryError::error(kind, message),
        }
    }
}

/// Wraps a wire error so it can travel through Lua frames.
pub(crate) fn raise(error: QueryError) -> mlua::Error {
    mlua::Error::external(ScriptSignal::Raised(error))
}

fn find_signal(error: &mlua::Error) -> Option<&ScriptSignal> {
    match error {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<ScriptSignal>(),
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            find_signal(cause)
        }
        _ => None,
    }
}

/// Innermost human-readable message of a Lua error, without tracebacks.
pub(crate) fn fault_message(error: &mlua::Error) -> String {
    match error {
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            fault_message(cause)
        }
        mlua::Error::RuntimeError(message) | mlua::Error::MemoryError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Strips a UTF-8 byte order mark and normalises line endings.
pub(crate) fn normalize_source(source: &str) -> String {
    source
        .strip_prefix('\u{feff}')
        .unwrap_or(source)
        .replace("\r\n", "\n")
}

fn setup_error(error: &mlua::Error) -> QueryError {
    QueryError::fatal("script_host_error", fault_message(error))
}

/// Metatable linking function environments to the sandbox. Scripts see
/// neither it nor the string metatable.
fn locked_meta(lua: &Lua, sandbox: Table) -> mlua::Result<Table> {
    let meta = lua.create_table()?;
    meta.set("__index", sandbox)?;
    meta.set("__metatable", false)?;
    lua.load("getmetatable('').__metatable = false")
        .set_name("=string metatable")
        .exec()?;
    Ok(meta)
}

/// Lua state plus the capabilities shared by every compiled function.
pub struct ScriptHost {
    lua: Lua,
    sandbox_meta: Table,
    bindings: Rc<RefCell<Bindings>>,
    channel: SharedChannel,
    dialect: Dialect,
}

impl ScriptHost {
    /// Creates a host whose `log` and `get_row` capabilities use `channel`.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the Lua state cannot be prepared.
    pub fn new(channel: SharedChannel, dialect: Dialect) -> Result<Self, QueryError> {
        let lua = Lua::new();
        let bindings = Rc::new(RefCell::new(Bindings::default()));
        let sandbox_meta = sandbox::build(&lua, &bindings, &channel, dialect)
            .and_then(|sandbox| locked_meta(&lua, sandbox))
            .map_err(|error| setup_error(&error))?;

        Ok(Self {
            lua,
            sandbox_meta,
            bindings,
            channel,
            dialect,
        })
    }

    /// Swaps in a freshly built sandbox for every environment, compiled or
    /// not yet compiled.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the sandbox cannot be rebuilt.
    pub fn refresh_sandbox(&self) -> Result<(), QueryError> {
        debug!(target: COMPILER_TARGET, "rebuilding sandbox");
        sandbox::build(&self.lua, &self.bindings, &self.channel, self.dialect)
            .and_then(|sandbox| self.sandbox_meta.raw_set("__index", sandbox))
            .map_err(|error| setup_error(&error))
    }

    /// The underlying Lua state.
    #[must_use]
    pub const fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Per-dispatch state shared with the capabilities.
    #[must_use]
    pub const fn bindings(&self) -> &Rc<RefCell<Bindings>> {
        &self.bindings
    }

    /// Channel used by the capabilities.
    #[must_use]
    pub const fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Creates a module registry for a design document tree.
    #[must_use]
    pub fn linker(
        &self,
        label: &str,
        tree: Value,
        artifacts: Rc<dyn ArtifactLoader>,
        artifacts_enabled: bool,
    ) -> Rc<Linker> {
        Linker::new(
            label,
            tree,
            self.sandbox_meta.clone(),
            artifacts,
            artifacts_enabled,
        )
    }

    /// Compiles `source` into a function.
    ///
    /// `label` names the chunk in error messages. When `linker` is given the
    /// function can `require` modules from that design document.
    ///
    /// # Errors
    ///
    /// Returns `compilation_error` when the source does not parse, fails
    /// while evaluating, or does not produce exactly one function.
    pub fn compile(
        &self,
        source: &str,
        label: &str,
        linker: Option<&Rc<Linker>>,
    ) -> Result<Function, QueryError> {
        debug!(target: COMPILER_TARGET, label, "compiling function");
        let normalized = normalize_source(source);
        let env = self
            .function_env(linker)
            .map_err(|error| setup_error(&error))?;
        let chunk_name = format!("={label}");

        let chunk = self
            .lua
            .load(format!("return {normalized}"))
            .set_name(chunk_name.clone())
            .set_environment(env.clone())
            .into_function()
            .or_else(|_| {
                self.lua
                    .load(normalized.as_str())
                    .set_name(chunk_name)
                    .set_environment(env.clone())
                    .into_function()
            })
            .map_err(|error| QueryError::compilation(fault_message(&error)))?;

        let produced: mlua::Value = chunk
            .call(())
            .map_err(|error| ScriptFault::from_lua(&error).into_error("compilation_error"))?;

        match produced {
            mlua::Value::Function(function) => Ok(function),
            mlua::Value::Nil => single_defined_function(&env),
            _ => Err(QueryError::compilation(
                "Expression does not eval to a function",
            )),
        }
    }

    /// Calls `function`, classifying any failure.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ScriptFault`] when the call fails.
    pub fn call(
        &self,
        function: &Function,
        args: impl IntoLuaMulti,
    ) -> Result<MultiValue, ScriptFault> {
        function
            .call::<MultiValue>(args)
            .map_err(|error| ScriptFault::from_lua(&error))
    }

    /// Converts a JSON value into a fresh Lua value.
    ///
    /// # Errors
    ///
    /// Returns `invalid_arguments` when the value cannot be represented.
    pub fn to_lua(&self, value: &Value) -> Result<mlua::Value, QueryError> {
        convert::to_lua(&self.lua, value)
            .map_err(|error| QueryError::invalid_arguments(fault_message(&error)))
    }

    /// Converts a Lua value produced by a script back into JSON.
    ///
    /// # Errors
    ///
    /// Returns `kind` when the value holds something JSON cannot express,
    /// such as a function.
    pub fn to_json(&self, value: mlua::Value, kind: &str) -> Result<Value, QueryError> {
        convert::to_json(&self.lua, value)
            .map_err(|error| QueryError::error(kind, fault_message(&error)))
    }

    fn function_env(&self, linker: Option<&Rc<Linker>>) -> mlua::Result<Table> {
        let env = self.lua.create_table()?;
        if let Some(registry) = linker {
            env.set("require", registry.require_function(&self.lua, None)?)?;
        }
        env.set_metatable(Some(self.sandbox_meta.clone()));
        Ok(env)
    }
}

fn single_defined_function(env: &Table) -> Result<Function, QueryError> {
    let mut found = None;
    for pair in env.clone().pairs::<mlua::Value, mlua::Value>() {
        let (key, value) = pair.map_err(|error| QueryError::compilation(fault_message(&error)))?;
        let is_require =
            matches!(&key, mlua::Value::String(name) if name.to_string_lossy() == "require");
        match value {
            mlua::Value::Function(function) if !is_require => {
                if found.replace(function).is_some() {
                    return Err(QueryError::compilation(
                        "Multiple functions are defined. Only one is allowed.",
                    ));
                }
            }
            _ => {}
        }
    }
    found.ok_or_else(|| QueryError::compilation("Expression does not eval to a function"))
}
