//! Design document cache.
//!
//! The host registers each design document once with `["ddoc", "new", id,
//! body]` and then calls its functions by path. Functions are compiled on
//! first use. Registering different content under a known id replaces the
//! entry wholesale, compiled functions and loaded modules included.

use std::collections::HashMap;
use std::rc::Rc;

use mlua::Function;
use serde_json::Value;
use tracing::{debug, info};

use crate::compiler::{Linker, ScriptHost};
use crate::error::QueryError;
use crate::protocol::Dialect;

pub(crate) const DDOC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ddoc");

/// Sub-commands of `ddoc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdocCommand {
    /// `validate_doc_update`.
    ValidateDocUpdate,
    /// `filters`.
    Filters,
    /// `views`, a map function used as a changes filter.
    Views,
    /// `shows`.
    Shows,
    /// `lists`.
    Lists,
    /// `updates`.
    Updates,
}

impl DdocCommand {
    /// Parses the head of a function path.
    ///
    /// # Errors
    ///
    /// Returns a fatal `unknown_command` for names the dialect does not
    /// support.
    pub fn parse(name: &str, dialect: Dialect) -> Result<Self, QueryError> {
        match name {
            "validate_doc_update" => Ok(Self::ValidateDocUpdate),
            "filters" => Ok(Self::Filters),
            "views" if dialect.view_filters() => Ok(Self::Views),
            "shows" => Ok(Self::Shows),
            "lists" => Ok(Self::Lists),
            "updates" => Ok(Self::Updates),
            _ => Err(QueryError::fatal(
                "unknown_command",
                format!("unknown ddoc command `{name}`"),
            )),
        }
    }
}

struct DesignDocument {
    body: Value,
    linker: Rc<Linker>,
    compiled: HashMap<String, Function>,
}

/// Registered design documents keyed by id.
#[derive(Default)]
pub struct DesignDocuments {
    entries: HashMap<String, DesignDocument>,
}

impl DesignDocuments {
    /// Registers `body` under `id`.
    ///
    /// Returns `false` when the same content was already registered, in which
    /// case compiled functions are kept.
    pub fn register(&mut self, id: &str, body: Value, linker: Rc<Linker>) -> bool {
        if self.entries.get(id).is_some_and(|entry| entry.body == body) {
            debug!(target: DDOC_TARGET, ddoc = id, "design document unchanged");
            return false;
        }
        let replaced = self
            .entries
            .insert(
                id.to_owned(),
                DesignDocument {
                    body,
                    linker,
                    compiled: HashMap::new(),
                },
            )
            .is_some();
        info!(target: DDOC_TARGET, ddoc = id, replaced, "design document registered");
        true
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Drops compiled functions and loaded modules, keeping the sources.
    pub fn forget_compiled(&mut self) {
        for entry in self.entries.values_mut() {
            entry.compiled.clear();
            entry.linker.forget();
        }
    }

    /// Compiles (once) and returns the function at `path`.
    ///
    /// # Errors
    ///
    /// Returns a fatal `query_protocol_error` for unknown ids, `not_found`
    /// when the path does not lead to a source string, and
    /// `compilation_error` for bad sources.
    pub fn function(
        &mut self,
        host: &ScriptHost,
        id: &str,
        path: &[String],
    ) -> Result<Function, QueryError> {
        let entry = self.entries.get_mut(id).ok_or_else(|| {
            QueryError::protocol(format!("uncached design doc: {id}"))
        })?;
        let key = path.join("/");
        if let Some(function) = entry.compiled.get(&key) {
            return Ok(function.clone());
        }

        let command = path.first().map_or("", String::as_str);
        let mut point = &entry.body;
        for item in path {
            point = point.get(item).filter(|found| !found.is_null()).ok_or_else(|| {
                QueryError::error(
                    "not_found",
                    format!("missing {command} function {item} on design doc {id}"),
                )
            })?;
        }
        let Value::String(source) = point else {
            return Err(QueryError::error(
                "not_found",
                format!("{key} on design doc {id} is not a function source"),
            ));
        };

        let label = format!("{id}/{key}");
        let function = host.compile(source, &label, Some(&entry.linker))?;
        entry.compiled.insert(key, function.clone());
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::compiler::DisabledArtifacts;
    use crate::protocol::ProtocolVersion;
    use crate::transport::JsonLines;

    #[fixture]
    fn host() -> ScriptHost {
        let channel = JsonLines::shared(Cursor::new(Vec::new()), Vec::new());
        ScriptHost::new(channel, Dialect::new(ProtocolVersion::new(1, 2, 0))).expect("host")
    }

    fn register(ddocs: &mut DesignDocuments, host: &ScriptHost, body: Value) -> bool {
        let linker = host.linker("_design/a", body.clone(), Rc::new(DisabledArtifacts), false);
        ddocs.register("_design/a", body, linker)
    }

    fn path(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| (*item).to_owned()).collect()
    }

    #[rstest]
    fn functions_are_compiled_once(host: ScriptHost) {
        let mut ddocs = DesignDocuments::default();
        register(&mut ddocs, &host, json!({"shows": {"a": "function() return 'a' end"}}));

        let first = ddocs.function(&host, "_design/a", &path(&["shows", "a"])).expect("first");
        let second = ddocs.function(&host, "_design/a", &path(&["shows", "a"])).expect("second");
        assert_eq!(first, second);
    }

    #[rstest]
    fn changed_content_replaces_the_entry(host: ScriptHost) {
        let mut ddocs = DesignDocuments::default();
        let body = json!({"shows": {"a": "function() return 'a' end"}});
        assert!(register(&mut ddocs, &host, body.clone()));
        let before = ddocs.function(&host, "_design/a", &path(&["shows", "a"])).expect("compiled");

        assert!(!register(&mut ddocs, &host, body));
        let same = ddocs.function(&host, "_design/a", &path(&["shows", "a"])).expect("cached");
        assert_eq!(before, same);

        assert!(register(&mut ddocs, &host, json!({"shows": {"a": "function() return 'b' end"}})));
        let after = ddocs.function(&host, "_design/a", &path(&["shows", "a"])).expect("recompiled");
        assert_ne!(before, after);
    }

    #[rstest]
    fn unknown_ids_are_fatal(host: ScriptHost) {
        let mut ddocs = DesignDocuments::default();
        let error = ddocs
            .function(&host, "_design/missing", &path(&["shows", "a"]))
            .expect_err("unknown");
        assert!(error.is_fatal());
        assert_eq!(error.message(), "uncached design doc: _design/missing");
    }

    #[rstest]
    fn missing_functions_are_not_found(host: ScriptHost) {
        let mut ddocs = DesignDocuments::default();
        register(&mut ddocs, &host, json!({"shows": {}}));
        let error = ddocs
            .function(&host, "_design/a", &path(&["shows", "b"]))
            .expect_err("missing");
        assert_eq!(error.kind(), "not_found");
        assert_eq!(error.message(), "missing shows function b on design doc _design/a");
    }

    #[rstest]
    #[case::views_on_new_hosts(ProtocolVersion::new(1, 2, 0), true)]
    #[case::views_on_one_one(ProtocolVersion::new(1, 1, 0), false)]
    fn views_sub_command_is_version_gated(#[case] version: ProtocolVersion, #[case] known: bool) {
        let parsed = DdocCommand::parse("views", Dialect::new(version));
        assert_eq!(parsed.is_ok(), known);
    }
}
