//! List functions over a streamed view result.

use mlua::Function;
use serde_json::Value;
use tracing::debug;

use super::response::content_text;
use super::stream::StreamState;
use super::{RENDER_TARGET, chosen_provider};
use crate::compiler::{RenderFrame, RenderScope, ScriptHost};
use crate::error::QueryError;

/// Runs a list function, writing the start, chunk and end lines to the
/// host channel itself.
///
/// The function receives the view head and the request and pulls rows with
/// `get_row`. Whatever it returns is appended as the final chunk.
///
/// # Errors
///
/// Returns `render_error` for script failures and stream misuse,
/// `not_acceptable` when no provider fits, and a fatal `list_error` when the
/// host breaks the row protocol.
pub fn list(
    host: &ScriptHost,
    function: &Function,
    head: &Value,
    request: &Value,
) -> Result<(), QueryError> {
    let scope = RenderScope::enter(host.bindings(), RenderFrame::new(StreamState::for_list()))?;

    let mut tail = host
        .call(function, (host.to_lua(head)?, host.to_lua(request)?))
        .map_err(|fault| fault.into_error("render_error"))?
        .into_iter()
        .next()
        .unwrap_or(mlua::Value::Nil);

    if let Some((negotiation, handler)) = chosen_provider(host, &scope, request)? {
        scope.with_frame(|frame| {
            frame.stream.set_content_type(negotiation.content_type);
            Ok(())
        })?;
        tail = host
            .call(&handler, ())
            .map_err(|fault| fault.into_error("render_error"))?
            .into_iter()
            .next()
            .unwrap_or(mlua::Value::Nil);
    }

    let tail = if tail.is_nil() {
        None
    } else {
        content_text(&host.to_json(tail, "render_error")?)
    };

    let mut frame = scope.finish()?;
    let mut channel = host
        .channel()
        .try_borrow_mut()
        .map_err(|error| QueryError::fatal("script_host_error", error.to_string()))?;
    frame.stream.finish(tail, &mut *channel)?;
    debug!(target: RENDER_TARGET, "list rendered");
    Ok(())
}
