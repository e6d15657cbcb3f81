//! Argument unpacking for each command era.
//!
//! Handlers pull positional arguments off the command, call into the
//! executing modules and return the line to answer with. List handlers
//! write their own output and answer `None`.

use serde_json::Value;
use tracing::debug;

use super::DISPATCH_TARGET;
use crate::ddoc::DdocCommand;
use crate::error::QueryError;
use crate::filters::{filter_docs, filter_view};
use crate::protocol::Arguments;
use crate::render::{list, list_begin, list_row, list_tail, show, show_doc, update};
use crate::state::ConnectionState;
use crate::validate::{ValidationInput, validate};
use crate::views::{map_doc, reduce, rereduce};

fn unrouted(name: &str) -> QueryError {
    QueryError::fatal("unknown_command", format!("unknown command {name}"))
}

fn strings(command: &str, name: &str, values: Vec<Value>) -> Result<Vec<String>, QueryError> {
    values
        .into_iter()
        .map(|value| match value {
            Value::String(text) => Ok(text),
            other => Err(QueryError::invalid_arguments(format!(
                "`{command}` expects `{name}` to hold strings, got {other}"
            ))),
        })
        .collect()
}

/// `reset`, `add_fun`, `add_lib`, `map_doc`, `reduce` and `rereduce`.
pub(super) fn views(
    state: &mut ConnectionState,
    name: &str,
    mut args: Arguments,
) -> Result<Option<Value>, QueryError> {
    let answer = match name {
        "reset" => {
            let config = args.optional().filter(Value::is_object);
            state.reset(config.as_ref())?
        }
        "add_fun" => state.add_fun(&args.string("source")?)?,
        "add_lib" => state.add_lib(args.object("library")?),
        "map_doc" => map_doc(state, &args.object("doc")?)?,
        "reduce" => {
            let sources = strings(name, "functions", args.array("functions")?)?;
            let rows = args.array("rows")?;
            reduce(state, &sources, rows)?
        }
        "rereduce" => {
            let sources = strings(name, "functions", args.array("functions")?)?;
            let values = args.array("values")?;
            rereduce(state, &sources, values)?
        }
        other => return Err(unrouted(other)),
    };
    Ok(Some(answer))
}

/// The 0.9 rendering commands.
pub(super) fn legacy_render(
    state: &mut ConnectionState,
    name: &str,
    mut args: Arguments,
) -> Result<Option<Value>, QueryError> {
    let answer = match name {
        "show_doc" => {
            let source = args.string("source")?;
            let doc = args.value("doc")?;
            let request = args.value("request")?;
            let function = state.compile_inline(&source, "show function")?;
            show_doc(state.host(), &function, &doc, &request, state.dialect())?
        }
        "list_begin" => {
            let head = args.value("head")?;
            let request = args.value("request")?;
            list_begin(state, &head, &request)?
        }
        "list_row" => {
            let row = args.value("row")?;
            let request = args.value("request")?;
            list_row(state, &row, &request)?
        }
        "list_tail" => {
            let request = args.value("request")?;
            list_tail(state, &request)?
        }
        "validate" => validate_inline(state, args)?,
        other => return Err(unrouted(other)),
    };
    Ok(Some(answer))
}

/// The 0.10 rendering commands.
pub(super) fn inline_render(
    state: &mut ConnectionState,
    name: &str,
    mut args: Arguments,
) -> Result<Option<Value>, QueryError> {
    let host = state.host();
    let dialect = state.dialect();
    let answer = match name {
        "show" => {
            let source = args.string("source")?;
            let doc = args.value("doc")?;
            let request = args.value("request")?;
            let function = state.compile_inline(&source, "show function")?;
            show(host, &function, &doc, &request, dialect)?
        }
        "update" => {
            let source = args.string("source")?;
            let doc = args.value("doc")?;
            let request = args.value("request")?;
            let function = state.compile_inline(&source, "update function")?;
            let allow_get = state.options().allow_get_update;
            update(host, &function, &doc, &request, allow_get, dialect)?
        }
        "list" => {
            let head = args.value("head")?;
            let request = args.value("request")?;
            list(host, &state.first_function()?, &head, &request)?;
            return Ok(None);
        }
        "filter" => {
            let docs = args.array("docs")?;
            let request = args.value("request")?;
            let userctx = args.optional();
            filter_docs(host, &state.first_function()?, &docs, &request, userctx, dialect)?
        }
        "validate" => validate_inline(state, args)?,
        other => return Err(unrouted(other)),
    };
    Ok(Some(answer))
}

fn validate_inline(state: &ConnectionState, mut args: Arguments) -> Result<Value, QueryError> {
    let source = args.string("source")?;
    let input = ValidationInput {
        new_doc: args.value("newdoc")?,
        old_doc: args.optional().unwrap_or(Value::Null),
        userctx: args.optional().unwrap_or(Value::Null),
        secobj: Value::Null,
    };
    let function = state.compile_inline(&source, "validate function")?;
    validate(state.host(), &function, &input, state.dialect())
}

/// `ddoc new <id> <body>` and `ddoc <id> <path> <arguments>`.
pub(super) fn design_document(
    state: &mut ConnectionState,
    mut args: Arguments,
) -> Result<Option<Value>, QueryError> {
    let target = args.string("id")?;
    if target == "new" {
        let id = args.string("id")?;
        let body = args.object("ddoc")?;
        state.register_ddoc(&id, body);
        return Ok(Some(Value::Bool(true)));
    }
    if !state.has_ddoc(&target) {
        return Err(QueryError::protocol(format!("uncached design doc: {target}")));
    }

    let path = strings("ddoc", "path", args.array("path")?)?;
    let Some(head) = path.first() else {
        return Err(QueryError::invalid_arguments("`ddoc` needs a function path"));
    };
    let command = DdocCommand::parse(head, state.dialect())?;
    let mut call = Arguments::new(format!("ddoc {head}"), args.array("arguments")?);
    debug!(target: DISPATCH_TARGET, ddoc = %target, path = %path.join("/"), "design document call");

    let function = state.ddoc_function(&target, &path)?;
    let host = state.host();
    let dialect = state.dialect();
    let answer = match command {
        DdocCommand::ValidateDocUpdate => {
            let input = ValidationInput {
                new_doc: call.value("newdoc")?,
                old_doc: call.optional().unwrap_or(Value::Null),
                userctx: call.optional().unwrap_or(Value::Null),
                secobj: call.optional().unwrap_or(Value::Null),
            };
            validate(host, &function, &input, dialect)?
        }
        DdocCommand::Filters => {
            let docs = call.array("docs")?;
            let request = call.optional().unwrap_or(Value::Null);
            let userctx = call.optional();
            filter_docs(host, &function, &docs, &request, userctx, dialect)?
        }
        DdocCommand::Views => filter_view(host, &function, &call.array("docs")?)?,
        DdocCommand::Shows => {
            let doc = call.value("doc")?;
            let request = call.value("request")?;
            show(host, &function, &doc, &request, dialect)?
        }
        DdocCommand::Lists => {
            let head = call.value("head")?;
            let request = call.value("request")?;
            list(host, &function, &head, &request)?;
            return Ok(None);
        }
        DdocCommand::Updates => {
            let doc = call.value("doc")?;
            let request = call.value("request")?;
            let allow_get = state.options().allow_get_update;
            update(host, &function, &doc, &request, allow_get, dialect)?
        }
    };
    Ok(Some(answer))
}
