//! Test harness utilities shared by the unit and behavioural suites.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use crate::compiler::{ArtifactLoader, DisabledArtifacts};
use crate::dispatch::{QueryServer, ServeError};
use crate::protocol::{Dialect, ProtocolVersion};
use crate::state::Options;
use crate::transport::{Channel, SharedChannel, TransportError};

/// Channel replaying scripted host lines and recording every answer.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    incoming: VecDeque<Value>,
    outgoing: Vec<Value>,
}

impl ScriptedChannel {
    /// Channel that will hand out `incoming` in order.
    pub fn new(incoming: Vec<Value>) -> Self {
        Self {
            incoming: incoming.into(),
            outgoing: Vec::new(),
        }
    }

    /// Queues more host lines.
    pub fn push(&mut self, lines: Vec<Value>) {
        self.incoming.extend(lines);
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<Value> {
        self.outgoing.clone()
    }

    /// Everything written since the last call.
    pub fn take_written(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.outgoing)
    }
}

impl Channel for ScriptedChannel {
    fn receive(&mut self) -> Result<Option<Value>, TransportError> {
        Ok(self.incoming.pop_front())
    }

    fn respond(&mut self, message: &Value) -> Result<(), TransportError> {
        self.outgoing.push(message.clone());
        Ok(())
    }
}

/// Writer whose bytes stay readable after it has been moved into a channel.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    /// Decodes every line written so far.
    pub fn lines(&self) -> Vec<Value> {
        self.bytes
            .borrow()
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).expect("written line must be JSON"))
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records the tracing events emitted while running a closure, one JSON
/// object per event.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Runs `work` with a debug-level JSON subscriber writing here.
    pub fn capture<T>(&self, work: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .without_time()
            .with_max_level(Level::DEBUG)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, work)
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<Value> {
        self.bytes
            .lock()
            .expect("log buffer lock")
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).expect("log line must be JSON"))
            .collect()
    }

    /// Whether an event at `level` on `target` carries `field` equal to
    /// `value`.
    pub fn contains(&self, level: &str, target: &str, field: &str, value: &str) -> bool {
        self.events().iter().any(|event| {
            event.get("level").and_then(Value::as_str) == Some(level)
                && event.get("target").and_then(Value::as_str) == Some(target)
                && event.get(field).and_then(Value::as_str) == Some(value)
        })
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Parses a dotted version used in test tables.
pub fn version(text: &str) -> ProtocolVersion {
    text.parse().expect("test version must parse")
}

/// A query server connected to a [`ScriptedChannel`].
pub struct Session {
    channel: Rc<RefCell<ScriptedChannel>>,
    server: QueryServer,
}

impl Session {
    /// Session for a host of the given version with default options.
    pub fn new(host_version: &str) -> Self {
        Self::with_options(host_version, Options::default(), Rc::new(DisabledArtifacts))
    }

    /// Session with explicit options and artifact loader.
    pub fn with_options(
        host_version: &str,
        options: Options,
        artifacts: Rc<dyn ArtifactLoader>,
    ) -> Self {
        let channel = Rc::new(RefCell::new(ScriptedChannel::default()));
        let shared: SharedChannel = channel.clone();
        let dialect = Dialect::new(version(host_version));
        let server =
            QueryServer::new(shared, dialect, options, artifacts).expect("server must start");
        Self { channel, server }
    }

    /// Feeds `lines` through the serve loop, returning what was written.
    pub fn exchange(&mut self, lines: Vec<Value>) -> (Result<(), ServeError>, Vec<Value>) {
        self.channel.borrow_mut().push(lines);
        let outcome = self.server.serve();
        (outcome, self.channel.borrow_mut().take_written())
    }

    /// Sends one command that must be answered with exactly one line.
    pub fn ask(&mut self, line: Value) -> Value {
        let (outcome, mut written) = self.exchange(vec![line]);
        assert!(outcome.is_ok(), "serve loop stopped: {outcome:?}");
        assert_eq!(written.len(), 1, "expected one answer, got {written:?}");
        written.remove(0)
    }

    /// Sends several commands, asserting each one is answered with `true`.
    pub fn setup(&mut self, lines: Vec<Value>) {
        for line in lines {
            let answer = self.ask(line.clone());
            assert_eq!(answer, Value::Bool(true), "setup line {line} failed");
        }
    }

    /// The server under test.
    pub const fn server(&self) -> &QueryServer {
        &self.server
    }
}
