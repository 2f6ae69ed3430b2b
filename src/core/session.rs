//! Chat log and the single in-flight exchange.
//!
//! [`ChatSession`] is the only writer of the log. Views read it through
//! [`ChatSession::messages`] and re-render when the revision published by
//! [`ChatSession::subscribe_changes`] moves.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::QueryRequest;
use crate::core::identity::SessionIdentity;
use crate::core::message::{ChatMessage, MessageId};
use crate::core::sentinel::CompletionSentinel;

pub const ERROR_MARKER: &str = "\n[Error receiving reply]";
pub const CANCELLED_MARKER: &str = "\n[Cancelled]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    EmptyMessage,
    ExchangeInFlight,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::EmptyMessage => write!(f, "message is empty"),
            SubmitError::ExchangeInFlight => {
                write!(f, "a reply is still streaming; wait for it to finish")
            }
        }
    }
}

impl std::error::Error for SubmitError {}

/// Signal raised the first time an assistant message contains the
/// completion phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub message_id: MessageId,
    pub triggered_at: Instant,
}

/// Everything needed to open the stream for a freshly submitted exchange.
#[derive(Debug, Clone)]
pub struct ExchangeTicket {
    pub stream_id: u64,
    pub message_id: MessageId,
    pub cancel_token: CancellationToken,
    pub payload: QueryRequest,
}

#[derive(Debug)]
struct InFlight {
    stream_id: u64,
    message_id: MessageId,
    index: usize,
    cancel_token: CancellationToken,
}

pub struct ChatSession {
    identity: SessionIdentity,
    messages: VecDeque<ChatMessage>,
    in_flight: Option<InFlight>,
    current_stream_id: u64,
    pending_input: String,
    sentinel: CompletionSentinel,
    revision: watch::Sender<u64>,
}

impl ChatSession {
    pub fn new(identity: SessionIdentity) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            identity,
            messages: VecDeque::new(),
            in_flight: None,
            current_stream_id: 0,
            pending_input: String::new(),
            sentinel: CompletionSentinel::new(),
            revision,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn messages(&self) -> &VecDeque<ChatMessage> {
        &self.messages
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|flight| flight.stream_id == stream_id)
    }

    pub fn in_flight_message(&self) -> Option<&ChatMessage> {
        let flight = self.in_flight.as_ref()?;
        self.messages.get(flight.index)
    }

    /// Revision counter bumped on every mutation of the log.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Begin one exchange: append the user message and an empty assistant
    /// placeholder, and mark the placeholder in flight.
    pub fn submit(&mut self, user_text: &str) -> Result<ExchangeTicket, SubmitError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyMessage);
        }
        if self.in_flight.is_some() {
            return Err(SubmitError::ExchangeInFlight);
        }

        self.messages.push_back(ChatMessage::user(text));
        let placeholder = ChatMessage::assistant_placeholder();
        let message_id = placeholder.id;
        self.messages.push_back(placeholder);

        self.current_stream_id += 1;
        let cancel_token = CancellationToken::new();
        self.in_flight = Some(InFlight {
            stream_id: self.current_stream_id,
            message_id,
            index: self.messages.len() - 1,
            cancel_token: cancel_token.clone(),
        });
        self.pending_input = text.to_string();
        self.bump_revision();

        debug!(stream_id = self.current_stream_id, "exchange submitted");
        Ok(ExchangeTicket {
            stream_id: self.current_stream_id,
            message_id,
            cancel_token,
            payload: QueryRequest {
                session_id: self.identity.session_id().to_string(),
                text: text.to_string(),
                patient_id: Some(self.identity.patient_id().to_string()),
            },
        })
    }

    /// Append `chunk` to the in-flight message and re-run the sentinel over
    /// the full text. Chunks for any other stream are dropped.
    pub fn apply_chunk(&mut self, stream_id: u64, chunk: &str) -> Option<CompletionEvent> {
        let Some(flight) = self.in_flight.as_ref().filter(|f| f.stream_id == stream_id) else {
            debug!(stream_id, "dropping chunk for stale stream");
            return None;
        };
        let message_id = flight.message_id;
        let message = self.messages.get_mut(flight.index)?;
        message.text.push_str(chunk);

        let fired = self.sentinel.check(message_id, &message.text);
        self.bump_revision();

        fired.then(|| CompletionEvent {
            message_id,
            triggered_at: Instant::now(),
        })
    }

    /// Clean end of stream. Returns the finished message.
    pub fn complete(&mut self, stream_id: u64) -> Option<&ChatMessage> {
        if !self.is_current_stream(stream_id) {
            return None;
        }
        let flight = self.in_flight.take()?;
        self.pending_input.clear();
        self.bump_revision();
        self.messages.get(flight.index)
    }

    /// Transport failure: mark the reply visibly and release the input.
    pub fn fail(&mut self, stream_id: u64) -> Option<&ChatMessage> {
        if !self.is_current_stream(stream_id) {
            return None;
        }
        self.finish_with_marker(ERROR_MARKER)
    }

    /// Abort the in-flight exchange, closing its connection.
    pub fn cancel(&mut self) -> Option<&ChatMessage> {
        let flight = self.in_flight.as_ref()?;
        flight.cancel_token.cancel();
        self.finish_with_marker(CANCELLED_MARKER)
    }

    /// Add an out-of-band system message. The in-flight reply keeps
    /// receiving chunks by position, so this never interleaves with it.
    pub fn push_system(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        self.bump_revision();
    }

    pub fn clear(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            flight.cancel_token.cancel();
        }
        self.messages.clear();
        self.sentinel.reset();
        self.pending_input.clear();
        self.bump_revision();
    }

    fn finish_with_marker(&mut self, marker: &str) -> Option<&ChatMessage> {
        let flight = self.in_flight.take()?;
        let message = self.messages.get_mut(flight.index)?;
        message.text.push_str(marker);
        self.bump_revision();
        self.messages.get(flight.index)
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}
