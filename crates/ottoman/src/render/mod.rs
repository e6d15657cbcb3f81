//! Show, list and update functions.
//!
//! Shows and updates answer with a single line. Lists stream: the function
//! pulls rows with `get_row`, buffering output with `send`, and the engine
//! writes the start, chunk and end lines around those pulls.

mod legacy;
mod list;
mod response;
mod show;
mod stream;
mod update;

use mlua::Function;
use serde_json::Value;

pub use legacy::{LegacyList, list_begin, list_row, list_tail, show_doc};
pub use list::list;
pub use response::{apply_content_type, body_response, content_text, normalize, wants_stop};
pub use show::show;
pub use stream::{Phase, StreamState};
pub use update::update;

use crate::compiler::{RenderScope, ScriptHost};
use crate::error::QueryError;
use crate::mime::{Negotiation, negotiate};

pub(crate) const RENDER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::render");

/// Picks the handler registered with `provides` that best fits `request`,
/// if the function registered any.
fn chosen_provider(
    host: &ScriptHost,
    scope: &RenderScope,
    request: &Value,
) -> Result<Option<(Negotiation, Function)>, QueryError> {
    let keys = scope.with_frame(|frame| Ok(frame.provided_keys()))?;
    if keys.is_empty() {
        return Ok(None);
    }
    let negotiation = {
        let bindings = host
            .bindings()
            .try_borrow()
            .map_err(|error| QueryError::fatal("script_host_error", error.to_string()))?;
        negotiate(bindings.mime(), &keys, request)?
    };
    let handler = scope.with_frame(|frame| {
        frame.provider(&negotiation.key).ok_or_else(|| {
            QueryError::fatal("script_host_error", "negotiated provider vanished")
        })
    })?;
    tracing::debug!(target: RENDER_TARGET, key = %negotiation.key, "provider chosen");
    Ok(Some((negotiation, handler)))
}
