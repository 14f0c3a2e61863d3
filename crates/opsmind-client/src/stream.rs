//! Server-sent-events ingestion for streamed answers.
//!
//! The remote side emits records separated by a blank line (`\n\n`). Each
//! record carries its payload on `data: ` lines as a JSON object. Bytes arrive
//! in arbitrary chunks, so the decoder keeps a byte buffer and only decodes a
//! record to text once it is complete: a multi-byte character split across two
//! chunks is never corrupted.
//!
//! Malformed records are skipped, not surfaced: the stream keeps going. A read
//! failure of the underlying connection is surfaced as an error item.
//!
//! ```
//! use opsmind_client::stream::SseDecoder;
//!
//! let mut decoder = SseDecoder::new();
//! assert!(decoder.push(b"data: {\"answer\":\"Hel").is_empty());
//!
//! let records = decoder.push(b"\"}\n\n");
//! assert_eq!(records, vec!["data: {\"answer\":\"Hel\"}".to_string()]);
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use log::{debug, trace};
use serde_json::{Map, Value};

use opsmind_common::{ToolCall, ToolOutcome};

use crate::error::ClientError;

/// Separator between two records.
pub const RECORD_SEPARATOR: &[u8] = b"\n\n";

/// Prefix of a payload-carrying line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload field holding an answer fragment.
pub const ANSWER_FIELD: &str = "answer";

/// A boxed stream of typed records.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<StreamRecord, ClientError>> + Send>>;

/// A boxed stream of answer fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// Incremental splitter turning raw chunks into complete records.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Appends `chunk` and returns every record it completed, in order.
    ///
    /// A trailing incomplete record stays buffered until a later chunk completes it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // A separator can straddle the previous chunk boundary.
        let mut search_from = self.pending.len().saturating_sub(RECORD_SEPARATOR.len() - 1);
        self.pending.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = find_separator(&self.pending[search_from..]) {
            let end = search_from + offset;
            let record = &self.pending[consumed..end];
            records.push(String::from_utf8_lossy(record).into_owned());
            consumed = end + RECORD_SEPARATOR.len();
            search_from = consumed;
        }
        if consumed > 0 {
            self.pending.drain(..consumed);
        }
        records
    }

    /// Number of buffered bytes not yet part of a complete record.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops the incomplete trailing record, returning how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

fn find_separator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(RECORD_SEPARATOR.len())
        .position(|window| window == RECORD_SEPARATOR)
}

/// Extracts the JSON payload of a record.
///
/// Joins the `data: ` lines of the record (SSE multi-line data) and parses the
/// result. Returns `None` for records without data lines and for payloads that
/// are not valid JSON.
#[must_use]
pub fn parse_payload(record: &str) -> Option<Value> {
    let data: Vec<&str> = record
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .collect();

    if data.is_empty() {
        trace!("Skipping record without data lines");
        return None;
    }

    match serde_json::from_str(&data.join("\n")) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Skipping malformed stream record: {e}");
            None
        }
    }
}

/// A decoded record of an answer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    /// A fragment of the answer text.
    Answer(String),
    /// The assistant started a tool invocation.
    ToolStarted(ToolCall),
    /// A tool invocation produced its observation.
    ToolFinished {
        /// Remote identifier of the invocation.
        id: String,
        /// Name of the tool.
        name: String,
        /// Arguments of the invocation.
        input: Map<String, Value>,
        /// What the tool produced.
        outcome: ToolOutcome,
    },
    /// The answer is complete.
    End {
        /// Remote conversation id the answer belongs to.
        conversation_id: Option<String>,
        /// Remote message id of the answer.
        message_id: Option<String>,
    },
    /// The remote side failed while producing the answer.
    Error {
        /// Failure reason reported by the remote side.
        message: String,
    },
}

impl StreamRecord {
    /// Classifies a parsed payload.
    ///
    /// A non-empty string `answer` field always makes an [`StreamRecord::Answer`],
    /// whatever the `event` field says. Other payloads are classified by their
    /// `event` field; unknown events yield `None`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if let Some(answer) = payload
            .get(ANSWER_FIELD)
            .and_then(Value::as_str)
            .filter(|answer| !answer.is_empty())
        {
            return Some(Self::Answer(answer.to_string()));
        }

        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match payload.get("event").and_then(Value::as_str)? {
            "agent_thought" => {
                let name = field("tool")?;
                let id = field("id").unwrap_or_else(|| name.clone());
                let input = parse_tool_input(payload.get("tool_input"));
                match field("observation") {
                    Some(observation) => Some(Self::ToolFinished {
                        id,
                        name,
                        input,
                        outcome: ToolOutcome::Completed(observation),
                    }),
                    None => Some(Self::ToolStarted(ToolCall::new(id, name, input))),
                }
            }
            "message_end" => Some(Self::End {
                conversation_id: field("conversation_id"),
                message_id: field("message_id").or_else(|| field("id")),
            }),
            "error" => Some(Self::Error {
                message: field("message").unwrap_or_else(|| "unknown stream error".to_string()),
            }),
            other => {
                trace!("Ignoring stream event '{other}'");
                None
            }
        }
    }

    /// Returns the answer fragment, if this is one.
    #[must_use]
    pub fn as_answer(&self) -> Option<&str> {
        match self {
            Self::Answer(text) => Some(text),
            _ => None,
        }
    }
}

/// Tool arguments arrive as a JSON-encoded string; anything that is not an
/// object is wrapped under an `input` key.
fn parse_tool_input(raw: Option<&Value>) -> Map<String, Value> {
    let value = match raw {
        Some(Value::String(s)) if s.trim().is_empty() => return Map::new(),
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(other) => other.clone(),
        None => return Map::new(),
    };

    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            map
        }
    }
}

struct IngestState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<StreamRecord>,
    finished: bool,
}

/// Turns a raw byte stream into typed records.
///
/// Records are yielded in arrival order. Malformed and unrecognised records are
/// skipped. A read error is yielded as the final item. At the end of the input
/// any incomplete trailing record is discarded.
pub fn records<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamRecord, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    let state = IngestState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.ready.pop_front() {
                return Some((Ok(record), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for raw in state.decoder.push(chunk.as_ref()) {
                        if let Some(record) =
                            parse_payload(&raw).and_then(|payload| StreamRecord::from_payload(&payload))
                        {
                            state.ready.push_back(record);
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let error: ClientError = e.into();
                    debug!("Stream read failed: {error}");
                    return Some((Err(error), state));
                }
                None => {
                    let discarded = state.decoder.finish();
                    if discarded > 0 {
                        debug!("Discarding {discarded} bytes of incomplete trailing record");
                    }
                    state.finished = true;
                }
            }
        }
    })
}

/// Turns a raw byte stream into answer fragments.
///
/// This is [`records`] restricted to [`StreamRecord::Answer`].
pub fn fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    records(bytes).try_filter_map(|record| async move {
        Ok(match record {
            StreamRecord::Answer(text) => Some(text),
            _ => None,
        })
    })
}
