//! Connection state threaded through every dispatch.
//!
//! Holds the functions registered with `add_fun`, the view library, compiled
//! reduce functions, the design document cache and the options negotiated for
//! this connection. `reset` clears everything except the registered design
//! documents, whose sources the host does not resend.

use std::collections::HashMap;
use std::rc::Rc;

use mlua::Function;
use ottoman_config::Config;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::compiler::{ArtifactLoader, Linker, ScriptHost};
use crate::ddoc::DesignDocuments;
use crate::error::QueryError;
use crate::protocol::Dialect;
use crate::render::LegacyList;
use crate::transport::SharedChannel;

pub(crate) const STATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::state");

/// Per-connection switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Reject reduce results that grow faster than their input.
    pub reduce_limit: bool,
    /// Allow update functions to serve `GET` requests.
    pub allow_get_update: bool,
    /// Hand packaged modules to the artifact loader.
    pub enable_artifacts: bool,
}

impl Options {
    /// Options taken from the loaded configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            reduce_limit: config.reduce_limit(),
            allow_get_update: config.allow_get_update(),
            enable_artifacts: config.enable_artifacts(),
        }
    }

    fn with_overrides(mut self, overrides: &Value) -> Self {
        if let Some(flag) = overrides.get("reduce_limit").and_then(as_flag) {
            self.reduce_limit = flag;
        }
        if let Some(flag) = overrides.get("allow_get_update").and_then(as_flag) {
            self.allow_get_update = flag;
        }
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Everything a dispatch may read or change.
pub struct ConnectionState {
    host: ScriptHost,
    dialect: Dialect,
    defaults: Options,
    options: Options,
    artifacts: Rc<dyn ArtifactLoader>,
    functions: Vec<Function>,
    view_library: Option<Rc<Linker>>,
    reducers: HashMap<String, Function>,
    ddocs: DesignDocuments,
    legacy_list: LegacyList,
}

impl ConnectionState {
    /// Fresh state talking to the host over `channel`.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the script host cannot be created.
    pub fn new(
        channel: SharedChannel,
        dialect: Dialect,
        options: Options,
        artifacts: Rc<dyn ArtifactLoader>,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            host: ScriptHost::new(channel, dialect)?,
            dialect,
            defaults: options,
            options,
            artifacts,
            functions: Vec::new(),
            view_library: None,
            reducers: HashMap::new(),
            ddocs: DesignDocuments::default(),
            legacy_list: LegacyList::default(),
        })
    }

    /// Script host shared by every function of this connection.
    #[must_use]
    pub const fn host(&self) -> &ScriptHost {
        &self.host
    }

    /// Protocol dialect of the host.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Options in force.
    #[must_use]
    pub const fn options(&self) -> Options {
        self.options
    }

    /// Functions registered with `add_fun`, in order.
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// First registered function, used by the inline render commands.
    ///
    /// # Errors
    ///
    /// Returns `not_found` when `add_fun` was never called.
    pub fn first_function(&self) -> Result<Function, QueryError> {
        self.functions.first().cloned().ok_or_else(|| {
            QueryError::error("not_found", "no function was registered with add_fun")
        })
    }

    /// Whether design document `id` was registered.
    #[must_use]
    pub fn has_ddoc(&self, id: &str) -> bool {
        self.ddocs.contains(id)
    }

    /// Registered design documents.
    pub const fn ddocs_mut(&mut self) -> &mut DesignDocuments {
        &mut self.ddocs
    }

    /// Row bookkeeping of the 0.9 list commands.
    pub const fn legacy_list_mut(&mut self) -> &mut LegacyList {
        &mut self.legacy_list
    }

    /// Clears per-connection caches and applies `config` overrides.
    ///
    /// Returns `true`, the wire answer to `reset`.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the sandbox cannot be rebuilt.
    pub fn reset(&mut self, config: Option<&Value>) -> Result<Value, QueryError> {
        self.host.refresh_sandbox()?;
        self.functions.clear();
        self.reducers.clear();
        self.view_library = None;
        self.legacy_list = LegacyList::default();
        self.ddocs.forget_compiled();
        if let Ok(mut bindings) = self.host.bindings().try_borrow_mut() {
            bindings.mime_mut().restore_defaults();
            bindings.take_emitted();
        }
        self.options = config.map_or(self.defaults, |overrides| {
            self.defaults.with_overrides(overrides)
        });
        info!(target: STATE_TARGET, options = ?self.options, "connection state reset");
        Ok(Value::Bool(true))
    }

    /// Compiles and registers a map function.
    ///
    /// # Errors
    ///
    /// Returns `compilation_error` when the source is not a function.
    pub fn add_fun(&mut self, source: &str) -> Result<Value, QueryError> {
        let label = format!("map function {}", self.functions.len());
        let linker = self.view_library.as_ref().filter(|_| self.dialect.view_library());
        let function = self.host.compile(source, &label, linker)?;
        self.functions.push(function);
        debug!(target: STATE_TARGET, count = self.functions.len(), "map function added");
        Ok(Value::Bool(true))
    }

    /// Registers the view library `require`d by map functions as
    /// `views/lib/...`.
    pub fn add_lib(&mut self, library: Value) -> Value {
        let tree = json!({ "views": { "lib": library } });
        self.view_library = Some(self.host.linker(
            "_view_library",
            tree,
            Rc::clone(&self.artifacts),
            self.options.enable_artifacts,
        ));
        Value::Bool(true)
    }

    /// Compiled reduce function for `source`, cached until `reset`.
    ///
    /// # Errors
    ///
    /// Returns `compilation_error` when the source is not a function.
    pub fn reducer(&mut self, source: &str) -> Result<Function, QueryError> {
        if let Some(function) = self.reducers.get(source) {
            return Ok(function.clone());
        }
        let function = self.host.compile(source, "reduce function", None)?;
        self.reducers.insert(source.to_owned(), function.clone());
        Ok(function)
    }

    /// Compiles a function shipped inline with a command.
    ///
    /// # Errors
    ///
    /// Returns `compilation_error` when the source is not a function.
    pub fn compile_inline(&self, source: &str, label: &str) -> Result<Function, QueryError> {
        self.host.compile(source, label, None)
    }

    /// Registers or replaces a design document.
    pub fn register_ddoc(&mut self, id: &str, body: Value) {
        let linker = self.host.linker(
            id,
            body.clone(),
            Rc::clone(&self.artifacts),
            self.options.enable_artifacts,
        );
        self.ddocs.register(id, body, linker);
    }

    /// Compiled function at `path` inside design document `id`.
    ///
    /// # Errors
    ///
    /// Returns a fatal `query_protocol_error` for unknown design documents,
    /// `not_found` for missing functions and `compilation_error` for bad
    /// sources.
    pub fn ddoc_function(&mut self, id: &str, path: &[String]) -> Result<Function, QueryError> {
        self.ddocs.function(&self.host, id, path)
    }
}
