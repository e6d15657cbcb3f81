//! State shared between the engine and the sandbox capabilities.
//!
//! Capabilities are `'static` closures owned by Lua, so they reach the
//! engine through an `Rc<RefCell<Bindings>>`. Borrows are only ever taken
//! for the duration of a single capability call and never across a call
//! back into Lua.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::Function;
use serde_json::Value;

use crate::error::QueryError;
use crate::mime::MimeRegistry;
use crate::render::StreamState;

/// State of an in-flight show or list rendering.
pub struct RenderFrame {
    /// Chunk and row stream.
    pub stream: StreamState,
    /// Handlers registered with `provides`, in registration order.
    pub providers: Vec<(String, Function)>,
}

impl RenderFrame {
    /// Frame wrapping `stream` with no providers.
    #[must_use]
    pub const fn new(stream: StreamState) -> Self {
        Self {
            stream,
            providers: Vec::new(),
        }
    }

    /// Registers `handler` for `key`, replacing an earlier handler in place.
    pub fn provide(&mut self, key: String, handler: Function) {
        match self.providers.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = handler,
            None => self.providers.push((key, handler)),
        }
    }

    /// Keys with a registered handler, in registration order.
    #[must_use]
    pub fn provided_keys(&self) -> Vec<String> {
        self.providers.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Handler registered for `key`.
    #[must_use]
    pub fn provider(&self, key: &str) -> Option<Function> {
        self.providers
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, handler)| handler.clone())
    }
}

/// Engine state reachable from script capabilities.
#[derive(Default)]
pub struct Bindings {
    emitted: Vec<(Value, Value)>,
    render: Option<RenderFrame>,
    mime: MimeRegistry,
}

impl Bindings {
    /// Records one `emit(key, value)` call.
    pub fn emit(&mut self, key: Value, value: Value) {
        self.emitted.push((key, value));
    }

    /// Drains the rows emitted since the last call.
    pub fn take_emitted(&mut self) -> Vec<(Value, Value)> {
        std::mem::take(&mut self.emitted)
    }

    /// Media type registry used by `register_type` and negotiation.
    #[must_use]
    pub const fn mime(&self) -> &MimeRegistry {
        &self.mime
    }

    /// Mutable media type registry.
    pub const fn mime_mut(&mut self) -> &mut MimeRegistry {
        &mut self.mime
    }

    /// Active render frame, for rendering-only capabilities.
    ///
    /// # Errors
    ///
    /// Returns `render_error` naming `capability` when nothing is being
    /// rendered.
    pub fn render_frame(&mut self, capability: &str) -> Result<&mut RenderFrame, QueryError> {
        self.render.as_mut().ok_or_else(|| {
            QueryError::render(format!(
                "`{capability}` is only available inside show and list functions"
            ))
        })
    }
}

/// Installs a [`RenderFrame`] for the duration of one dispatch.
///
/// Dropping the scope removes the frame, so an early return cannot leak
/// rendering state into the next command.
pub struct RenderScope {
    bindings: Rc<RefCell<Bindings>>,
}

impl RenderScope {
    /// Makes `frame` the active render frame.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the bindings are already borrowed.
    pub fn enter(bindings: &Rc<RefCell<Bindings>>, frame: RenderFrame) -> Result<Self, QueryError> {
        bindings
            .try_borrow_mut()
            .map_err(|error| QueryError::fatal("script_host_error", error.to_string()))?
            .render = Some(frame);
        Ok(Self {
            bindings: Rc::clone(bindings),
        })
    }

    /// Runs `action` against the active frame.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the bindings are busy or the frame is gone.
    pub fn with_frame<T>(
        &self,
        action: impl FnOnce(&mut RenderFrame) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        let mut bindings = self
            .bindings
            .try_borrow_mut()
            .map_err(|error| QueryError::fatal("script_host_error", error.to_string()))?;
        let frame = bindings
            .render
            .as_mut()
            .ok_or_else(|| QueryError::fatal("script_host_error", "render frame vanished"))?;
        action(frame)
    }

    /// Removes and returns the frame.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the bindings are busy or the frame is gone.
    pub fn finish(self) -> Result<RenderFrame, QueryError> {
        let mut bindings = self
            .bindings
            .try_borrow_mut()
            .map_err(|error| QueryError::fatal("script_host_error", error.to_string()))?;
        bindings
            .render
            .take()
            .ok_or_else(|| QueryError::fatal("script_host_error", "render frame vanished"))
    }
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        if let Ok(mut bindings) = self.bindings.try_borrow_mut() {
            bindings.render = None;
        }
    }
}
