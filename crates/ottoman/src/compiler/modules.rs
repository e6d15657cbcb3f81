//! Per-design-document module registry behind `require`.
//!
//! Module ids are `/`-separated paths into the design document tree. A
//! module body runs at most once per registry; later requires of the same id
//! return the cached exports value itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use mlua::{Function, Lua, Table};
use serde_json::Value;
use tracing::debug;

use super::{COMPILER_TARGET, ScriptFault, fault_message, normalize_source, raise};
use crate::error::QueryError;

/// Prefix of a base64-encoded zip archive.
pub const ARTIFACT_PREFIX: &str = "UEsDBBQAAAAIA";

/// Turns packaged module bundles into Lua source.
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactLoader {
    /// Extracts the module source from the encoded `payload` stored at
    /// `module_id`.
    ///
    /// # Errors
    ///
    /// Returns an `artifact_error` when the bundle cannot be used.
    fn load(&self, module_id: &str, payload: &str) -> Result<String, QueryError>;
}

/// Loader used when no bundle support is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledArtifacts;

impl ArtifactLoader for DisabledArtifacts {
    fn load(&self, module_id: &str, _payload: &str) -> Result<String, QueryError> {
        Err(QueryError::error(
            "artifact_error",
            format!("no artifact loader is available for module {module_id}"),
        ))
    }
}

fn invalid_path(message: impl Into<String>) -> QueryError {
    QueryError::error("invalid_require_path", message)
}

/// Resolves `requested` against the directory `parent` of the requiring
/// module.
///
/// `parent` is `None` for design functions, which may only use absolute
/// paths, and `Some("")` for modules at the top of the tree.
///
/// # Errors
///
/// Returns `invalid_require_path` for empty segments, relative paths without
/// a parent and paths climbing above the design document root.
pub fn resolve_path<'a>(parent: Option<&'a str>, requested: &'a str) -> Result<String, QueryError> {
    let mut segments = requested.split('/').peekable();
    let relative = matches!(segments.peek(), Some(&("." | "..")));
    let mut resolved: Vec<&str> = match (relative, parent) {
        (false, _) => Vec::new(),
        (true, Some(dir)) => dir.split('/').filter(|part| !part.is_empty()).collect(),
        (true, None) => {
            return Err(invalid_path(format!("Object {requested} has no parent")));
        }
    };

    for segment in segments {
        match segment {
            "" => {
                return Err(invalid_path(format!(
                    "Required path shouldn't start with a slash or contain empty segments: {requested}"
                )));
            }
            "." => {}
            ".." => {
                if resolved.pop().is_none() {
                    return Err(invalid_path(format!("Object {requested} has no parent")));
                }
            }
            name => resolved.push(name),
        }
    }

    if resolved.is_empty() {
        return Err(invalid_path(format!(
            "Required path {requested} names the design document itself"
        )));
    }
    Ok(resolved.join("/"))
}

fn parent_dir(id: &str) -> String {
    id.rsplit_once('/')
        .map_or_else(String::new, |(dir, _)| dir.to_owned())
}

#[derive(Clone)]
enum Slot {
    Loading,
    Ready(mlua::Value),
}

/// Module registry bound to one design document.
pub struct Linker {
    label: String,
    tree: Value,
    env_meta: Table,
    artifacts: Rc<dyn ArtifactLoader>,
    artifacts_enabled: bool,
    slots: RefCell<HashMap<String, Slot>>,
}

impl Linker {
    /// Registry resolving ids against `tree`. Module environments fall back
    /// to `env_meta`.
    #[must_use]
    pub fn new(
        label: &str,
        tree: Value,
        env_meta: Table,
        artifacts: Rc<dyn ArtifactLoader>,
        artifacts_enabled: bool,
    ) -> Rc<Self> {
        Rc::new(Self {
            label: label.to_owned(),
            tree,
            env_meta,
            artifacts,
            artifacts_enabled,
            slots: RefCell::new(HashMap::new()),
        })
    }

    /// A `require` callable for code living in directory `parent`.
    ///
    /// # Errors
    ///
    /// Propagates Lua allocation failures.
    pub fn require_function(
        self: &Rc<Self>,
        lua: &Lua,
        parent: Option<String>,
    ) -> mlua::Result<Function> {
        let linker = Rc::clone(self);
        lua.create_function(move |lua, path: mlua::Value| {
            let mlua::Value::String(path) = path else {
                return Err(raise(invalid_path(format!(
                    "require expects a string path, got {}",
                    path.type_name()
                ))));
            };
            linker
                .require(lua, parent.as_deref(), &path.to_string_lossy())
                .map_err(raise)
        })
    }

    /// Exports of the module at `path`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns `invalid_require_path` for unresolvable paths,
    /// `circular_require` when a module requires itself through a cycle, and
    /// `compilation_error` when the module body fails.
    pub fn require(
        self: &Rc<Self>,
        lua: &Lua,
        parent: Option<&str>,
        path: &str,
    ) -> Result<mlua::Value, QueryError> {
        let id = resolve_path(parent, path)?;
        let cached = self.slots.borrow().get(&id).cloned();
        match cached {
            Some(Slot::Ready(exports)) => return Ok(exports),
            Some(Slot::Loading) => {
                return Err(QueryError::error(
                    "circular_require",
                    format!("module {id} of {} requires itself", self.label),
                ));
            }
            None => {}
        }

        let source = self.lookup(&id)?;
        debug!(target: COMPILER_TARGET, ddoc = %self.label, module = %id, "loading module");
        self.slots.borrow_mut().insert(id.clone(), Slot::Loading);
        let loaded = self.load(lua, &id, &source);
        let mut slots = self.slots.borrow_mut();
        match &loaded {
            Ok(exports) => {
                slots.insert(id, Slot::Ready(exports.clone()));
            }
            Err(_) => {
                slots.remove(&id);
            }
        }
        loaded
    }

    /// Drops every loaded module.
    pub fn forget(&self) {
        self.slots.borrow_mut().clear();
    }

    fn lookup(&self, id: &str) -> Result<String, QueryError> {
        let mut current = &self.tree;
        let mut owner = self.label.clone();
        for segment in id.split('/') {
            current = current.get(segment).ok_or_else(|| {
                invalid_path(format!("Object {owner} has no property {segment}"))
            })?;
            owner = format!("{owner}/{segment}");
        }
        match current {
            Value::String(source) => Ok(source.clone()),
            other => Err(invalid_path(format!(
                "Must require a source string, not {} (at {id})",
                json_type(other)
            ))),
        }
    }

    fn load(self: &Rc<Self>, lua: &Lua, id: &str, source: &str) -> Result<mlua::Value, QueryError> {
        let text = if self.artifacts_enabled && source.starts_with(ARTIFACT_PREFIX) {
            debug!(target: COMPILER_TARGET, module = %id, "unpacking artifact module");
            self.artifacts.load(id, source)?
        } else {
            source.to_owned()
        };

        let failure =
            |error: mlua::Error| ScriptFault::from_lua(&error).into_error("compilation_error");
        let exports = lua.create_table().map_err(failure)?;
        let module = lua.create_table().map_err(failure)?;
        module.set("id", id).map_err(failure)?;
        module.set("exports", exports.clone()).map_err(failure)?;

        let env = lua.create_table().map_err(failure)?;
        env.set("exports", exports).map_err(failure)?;
        env.set("module", module.clone()).map_err(failure)?;
        env.set("require", self.require_function(lua, Some(parent_dir(id))).map_err(failure)?)
            .map_err(failure)?;
        env.set_metatable(Some(self.env_meta.clone()));

        let chunk = lua
            .load(normalize_source(&text))
            .set_name(format!("={}/{id}", self.label))
            .set_environment(env)
            .into_function()
            .map_err(|error| QueryError::compilation(fault_message(&error)))?;

        match chunk.call::<mlua::Value>(()).map_err(failure)? {
            mlua::Value::Nil => module.get("exports").map_err(failure),
            returned => Ok(returned),
        }
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
