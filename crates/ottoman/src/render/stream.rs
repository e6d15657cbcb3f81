//! Chunked response controller shared by shows and lists.
//!
//! In a list the host drives the conversation: every row fetch first
//! flushes the buffered chunks (the first fetch sends the start line with the
//! response head), then reads one `["list_row", row]` or `["list_end"]` line.

use serde_json::{Map, Value, json};
use tracing::debug;

use super::RENDER_TARGET;
use crate::error::QueryError;
use crate::transport::Channel;

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has been started or sent.
    NotStarted,
    /// A head was started or chunks were sent.
    Started,
    /// Rows are exhausted or the function asked to stop.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Show,
    List,
}

/// Buffered chunks and start head of one rendering.
#[derive(Debug, Clone)]
pub struct StreamState {
    mode: Mode,
    phase: Phase,
    head: Map<String, Value>,
    chunks: Vec<String>,
    head_sent: bool,
    content_type: Option<String>,
}

impl StreamState {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            phase: Phase::NotStarted,
            head: Map::new(),
            chunks: Vec::new(),
            head_sent: false,
            content_type: None,
        }
    }

    /// Stream for a list function, which may fetch rows.
    #[must_use]
    pub fn for_list() -> Self {
        Self::new(Mode::List)
    }

    /// Stream for a show function, which only buffers chunks.
    #[must_use]
    pub fn for_show() -> Self {
        Self::new(Mode::Show)
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the start line has been written.
    #[must_use]
    pub const fn head_sent(&self) -> bool {
        self.head_sent
    }

    /// Sets the content type applied to the start head.
    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    /// Records the response head (`code`, `headers`).
    ///
    /// # Errors
    ///
    /// Returns `render_error` once anything has been started or sent.
    pub fn start(&mut self, head: Map<String, Value>) -> Result<(), QueryError> {
        if self.phase != Phase::NotStarted {
            return Err(QueryError::render(
                "start() must be called before any send() or get_row()",
            ));
        }
        self.head = head;
        self.phase = Phase::Started;
        Ok(())
    }

    /// Buffers a chunk, starting the stream implicitly if needed.
    ///
    /// # Errors
    ///
    /// Returns `render_error` after the stream stopped.
    pub fn send(&mut self, chunk: String) -> Result<(), QueryError> {
        match self.phase {
            Phase::Stopped => Err(QueryError::render("send() called after the list stopped")),
            Phase::NotStarted => {
                self.phase = Phase::Started;
                self.chunks.push(chunk);
                Ok(())
            }
            Phase::Started => {
                self.chunks.push(chunk);
                Ok(())
            }
        }
    }

    /// Marks the stream stopped; no further rows are fetched.
    pub fn stop(&mut self) {
        self.phase = Phase::Stopped;
    }

    /// Flushes buffered output and fetches the next row from the host.
    ///
    /// Returns `None` once the host signals the end of the rows, and on
    /// every call after that.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside lists, and a fatal `list_error` when
    /// the host answers with anything but a row or the end marker.
    pub fn next_row(&mut self, channel: &mut dyn Channel) -> Result<Option<Value>, QueryError> {
        if self.mode == Mode::Show {
            return Err(QueryError::render(
                "get_row() is only available in list functions",
            ));
        }
        if self.phase == Phase::Stopped {
            return Ok(None);
        }
        self.fetch(channel)
    }

    fn fetch(&mut self, channel: &mut dyn Channel) -> Result<Option<Value>, QueryError> {
        let chunks = std::mem::take(&mut self.chunks);
        let line = if self.head_sent {
            json!(["chunks", chunks])
        } else {
            self.head_sent = true;
            self.phase = Phase::Started;
            json!(["start", chunks, self.response_head()])
        };
        channel
            .respond(&line)
            .map_err(crate::transport::TransportError::into_query_error)?;

        let Some(reply) = channel
            .receive()
            .map_err(crate::transport::TransportError::into_query_error)?
        else {
            return Err(QueryError::fatal(
                "list_error",
                "host closed the stream before list_end",
            ));
        };

        match reply.get(0).and_then(Value::as_str) {
            Some("list_row") => Ok(Some(reply.get(1).cloned().unwrap_or(Value::Null))),
            Some("list_end") => {
                debug!(target: RENDER_TARGET, "list rows exhausted");
                self.phase = Phase::Stopped;
                Ok(None)
            }
            Some(tag) => Err(QueryError::fatal("list_error", format!("not a row `{tag}`"))),
            None => Err(QueryError::fatal("list_error", format!("not a row `{reply}`"))),
        }
    }

    /// Completes a list: sends the start line if no row was ever fetched,
    /// then the buffered chunks plus `tail` as the end line.
    ///
    /// # Errors
    ///
    /// Propagates channel failures and unexpected host replies.
    pub fn finish(
        &mut self,
        tail: Option<String>,
        channel: &mut dyn Channel,
    ) -> Result<(), QueryError> {
        if !self.head_sent {
            self.fetch(channel)?;
        }
        if let Some(text) = tail {
            self.chunks.push(text);
        }
        let chunks = std::mem::take(&mut self.chunks);
        self.phase = Phase::Stopped;
        channel
            .respond(&json!(["end", chunks]))
            .map_err(crate::transport::TransportError::into_query_error)
    }

    /// Buffered chunks and start head of a show, for merging into its
    /// response.
    #[must_use]
    pub fn into_show_parts(self) -> (Vec<String>, Map<String, Value>) {
        (self.chunks, self.head)
    }

    fn response_head(&self) -> Value {
        let mut head = self.head.clone();
        super::response::apply_content_type(&mut head, self.content_type.as_deref());
        Value::Object(head)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::tests::support::ScriptedChannel;

    #[rstest]
    fn first_fetch_sends_start_line_with_head() {
        let mut channel = ScriptedChannel::new(vec![json!(["list_row", {"key": 1}])]);
        let mut stream = StreamState::for_list();
        let mut head = Map::new();
        head.insert("headers".to_owned(), json!({"X-Test": "1"}));
        stream.start(head).expect("start");
        stream.send("a".to_owned()).expect("send");

        let row = stream.next_row(&mut channel).expect("row");
        assert_eq!(row, Some(json!({"key": 1})));
        assert_eq!(
            channel.written(),
            vec![json!(["start", ["a"], {"headers": {"X-Test": "1"}}])]
        );
    }

    #[rstest]
    fn later_fetches_flush_chunks() {
        let mut channel = ScriptedChannel::new(vec![
            json!(["list_row", 1]),
            json!(["list_row", 2]),
            json!(["list_end"]),
        ]);
        let mut stream = StreamState::for_list();
        stream.next_row(&mut channel).expect("first");
        stream.send("x".to_owned()).expect("send");
        stream.next_row(&mut channel).expect("second");
        assert_eq!(stream.next_row(&mut channel).expect("end"), None);
        assert_eq!(stream.phase(), Phase::Stopped);

        let written = channel.written();
        assert_eq!(written.get(1), Some(&json!(["chunks", ["x"]])));
        assert_eq!(written.get(2), Some(&json!(["chunks", []])));
    }

    #[rstest]
    fn stopped_stream_yields_nothing_and_rejects_send() {
        let mut channel = ScriptedChannel::new(vec![json!(["list_end"])]);
        let mut stream = StreamState::for_list();
        assert_eq!(stream.next_row(&mut channel).expect("end"), None);
        assert_eq!(stream.next_row(&mut channel).expect("still end"), None);
        assert_eq!(channel.written().len(), 1);

        let error = stream.send("late".to_owned()).expect_err("rejected");
        assert_eq!(error.kind(), "render_error");
        assert!(!error.is_fatal());
    }

    #[rstest]
    fn start_after_send_is_rejected() {
        let mut stream = StreamState::for_list();
        stream.send("chunk".to_owned()).expect("send");
        let error = stream.start(Map::new()).expect_err("late start");
        assert_eq!(error.kind(), "render_error");
    }

    #[rstest]
    #[case::unknown_tag(json!(["reset"]), "not a row `reset`")]
    #[case::not_an_array(json!({"row": 1}), "not a row `{\"row\":1}`")]
    fn unexpected_replies_are_fatal(#[case] reply: Value, #[case] message: &str) {
        let mut channel = ScriptedChannel::new(vec![reply]);
        let mut stream = StreamState::for_list();
        let error = stream.next_row(&mut channel).expect_err("fatal");
        assert!(error.is_fatal());
        assert_eq!(error.kind(), "list_error");
        assert_eq!(error.message(), message);
    }

    #[rstest]
    fn finish_without_rows_still_starts() {
        let mut channel = ScriptedChannel::new(vec![json!(["list_end"])]);
        let mut stream = StreamState::for_list();
        stream.set_content_type(Some("text/html".to_owned()));
        stream.finish(Some("tail".to_owned()), &mut channel).expect("finish");

        assert_eq!(
            channel.written(),
            vec![
                json!(["start", [], {"headers": {"Content-Type": "text/html"}}]),
                json!(["end", ["tail"]]),
            ]
        );
    }

    #[rstest]
    fn shows_cannot_fetch_rows() {
        let mut channel = ScriptedChannel::new(Vec::new());
        let mut stream = StreamState::for_show();
        let error = stream.next_row(&mut channel).expect_err("no rows");
        assert_eq!(error.kind(), "render_error");
        assert!(channel.written().is_empty());
    }
}
