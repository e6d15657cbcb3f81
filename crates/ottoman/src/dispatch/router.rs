//! Version-gated command routing.
//!
//! Each protocol era contributes a table of command names. The router keeps
//! the tables the host version speaks and hands every command to the
//! handlers of the table that knows it. Names outside those tables are fatal.

use serde_json::Value;
use tracing::debug;

use super::DISPATCH_TARGET;
use super::handlers;
use crate::error::QueryError;
use crate::protocol::{Command, CommandFamily, Dialect};
use crate::state::ConnectionState;

/// Command set of one protocol era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Era {
    /// View commands every host speaks.
    Views,
    /// `add_lib`, from 1.1 on.
    ViewLibrary,
    /// 0.9 rendering commands.
    LegacyRender,
    /// 0.10 rendering commands with inline sources.
    InlineRender,
    /// `ddoc`, from 0.11 on.
    DesignDocuments,
}

/// Known commands of one era.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommandTable {
    pub(crate) era: Era,
    pub(crate) known_commands: &'static [&'static str],
}

impl CommandTable {
    const VIEWS: Self = Self {
        era: Era::Views,
        known_commands: &["reset", "add_fun", "map_doc", "reduce", "rereduce"],
    };

    const VIEW_LIBRARY: Self = Self {
        era: Era::ViewLibrary,
        known_commands: &["add_lib"],
    };

    const LEGACY_RENDER: Self = Self {
        era: Era::LegacyRender,
        known_commands: &["show_doc", "list_begin", "list_row", "list_tail", "validate"],
    };

    const INLINE_RENDER: Self = Self {
        era: Era::InlineRender,
        known_commands: &["show", "list", "filter", "update", "validate"],
    };

    const DESIGN_DOCUMENTS: Self = Self {
        era: Era::DesignDocuments,
        known_commands: &["ddoc"],
    };

    fn knows(&self, name: &str) -> bool {
        self.known_commands.contains(&name)
    }
}

/// Routes decoded commands to their handlers.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    tables: Vec<CommandTable>,
}

impl CommandRouter {
    /// Router for the commands `dialect` speaks.
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        let mut tables = vec![CommandTable::VIEWS];
        match dialect.family() {
            CommandFamily::ViewsOnly => {}
            CommandFamily::LegacyRender => tables.push(CommandTable::LEGACY_RENDER),
            CommandFamily::InlineRender => tables.push(CommandTable::INLINE_RENDER),
            CommandFamily::DesignDocuments => tables.push(CommandTable::DESIGN_DOCUMENTS),
        }
        if dialect.view_library() {
            tables.push(CommandTable::VIEW_LIBRARY);
        }
        Self { tables }
    }

    /// Era of `name`, if this router knows it.
    #[must_use]
    pub fn era_of(&self, name: &str) -> Option<Era> {
        self.tables
            .iter()
            .find(|table| table.knows(name))
            .map(|table| table.era)
    }

    /// Runs `command` against `state`.
    ///
    /// Returns the line to answer with, or `None` when the handler wrote its
    /// own output.
    ///
    /// # Errors
    ///
    /// Returns a fatal `unknown_command` for names outside the tables, and
    /// whatever the handler reports otherwise.
    pub fn route(
        &self,
        state: &mut ConnectionState,
        command: Command,
    ) -> Result<Option<Value>, QueryError> {
        let Some(era) = self.era_of(command.name()) else {
            return Err(QueryError::fatal(
                "unknown_command",
                format!("unknown command {}", command.name()),
            ));
        };
        let name = command.name().to_owned();
        debug!(target: DISPATCH_TARGET, command = %name, ?era, "routing command");

        let arguments = command.into_arguments();
        match era {
            Era::Views | Era::ViewLibrary => handlers::views(state, &name, arguments),
            Era::LegacyRender => handlers::legacy_render(state, &name, arguments),
            Era::InlineRender => handlers::inline_render(state, &name, arguments),
            Era::DesignDocuments => handlers::design_document(state, arguments),
        }
    }
}
