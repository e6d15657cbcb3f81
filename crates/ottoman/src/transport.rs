//! Line-delimited JSON channel to the host.
//!
//! The host writes one JSON document per line on our stdin and reads one per
//! line from our stdout. [`Channel`] abstracts that pair so the serve loop,
//! script `log()` calls and list row iteration can share a single stream.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use crate::error::QueryError;
use crate::protocol::decode_line;

/// Channel shared between the serve loop and script capabilities.
pub type SharedChannel = Rc<RefCell<dyn Channel>>;

/// Errors raised while moving lines across the channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading from the host failed.
    #[error("failed to read from host: {source}")]
    Read {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Writing to the host failed.
    #[error("failed to write to host: {source}")]
    Write {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A line could not be serialised.
    #[error("failed to serialise response: {source}")]
    Serialize {
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
    /// The host sent a line that is not JSON.
    #[error("{0}")]
    Decode(QueryError),
}

impl TransportError {
    /// Protocol-level view of this failure; every transport fault is fatal.
    #[must_use]
    pub fn into_query_error(self) -> QueryError {
        match self {
            Self::Decode(error) => error,
            other => QueryError::fatal("transport_error", other.to_string()),
        }
    }
}

/// Bidirectional line channel.
pub trait Channel {
    /// Reads the next line, or `None` once the host closes the stream.
    ///
    /// # Errors
    ///
    /// Returns an error when reading fails or the line is not JSON.
    fn receive(&mut self) -> Result<Option<Value>, TransportError>;

    /// Writes one line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error when serialising or writing fails.
    fn respond(&mut self, message: &Value) -> Result<(), TransportError>;
}

/// [`Channel`] over a buffered reader and a writer.
pub struct JsonLines<R, W> {
    reader: R,
    writer: W,
    line: Vec<u8>,
}

impl<R: BufRead, W: Write> JsonLines<R, W> {
    /// Wraps the given streams.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: Vec::new(),
        }
    }

    /// Wraps the given streams in a shareable handle.
    pub fn shared(reader: R, writer: W) -> SharedChannel
    where
        R: 'static,
        W: 'static,
    {
        Rc::new(RefCell::new(Self::new(reader, writer)))
    }
}

impl<R: BufRead, W: Write> Channel for JsonLines<R, W> {
    fn receive(&mut self) -> Result<Option<Value>, TransportError> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .map_err(|source| TransportError::Read { source })?;
            if read == 0 {
                return Ok(None);
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return decode_line(&self.line)
                .map(Some)
                .map_err(TransportError::Decode);
        }
    }

    fn respond(&mut self, message: &Value) -> Result<(), TransportError> {
        serde_json::to_writer(&mut self.writer, message)
            .map_err(|source| TransportError::Serialize { source })?;
        self.writer
            .write_all(b"\n")
            .map_err(|source| TransportError::Write { source })?;
        self.writer
            .flush()
            .map_err(|source| TransportError::Write { source })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    #[test]
    fn reads_lines_and_skips_blank_ones() {
        let input = Cursor::new(b"[\"reset\"]\n\n  \n[\"add_fun\",\"x\"]\n".to_vec());
        let mut channel = JsonLines::new(input, Vec::new());

        assert_eq!(channel.receive().expect("first"), Some(json!(["reset"])));
        assert_eq!(channel.receive().expect("second"), Some(json!(["add_fun", "x"])));
        assert_eq!(channel.receive().expect("eof"), None);
    }

    #[test]
    fn writes_one_line_per_message() {
        let mut channel = JsonLines::new(Cursor::new(Vec::new()), Vec::new());
        channel.respond(&json!(true)).expect("write");
        channel.respond(&json!(["log", "x"])).expect("write");

        assert_eq!(channel.writer, b"true\n[\"log\",\"x\"]\n");
    }

    #[test]
    fn malformed_input_surfaces_as_fatal_decode_error() {
        let mut channel = JsonLines::new(Cursor::new(b"{nope\n".to_vec()), Vec::new());
        let error = channel.receive().expect_err("malformed");
        let query_error = error.into_query_error();
        assert!(query_error.is_fatal());
        assert_eq!(query_error.kind(), "json_decode");
    }
}
