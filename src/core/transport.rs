//! Streaming transport between the chat client and the relay.
//!
//! [`open_stream`] issues a single POST and hands back a [`ChunkStream`] as
//! soon as response headers arrive. The body is pulled incrementally and
//! decoded with a stateful UTF-8 decoder, so no chunk waits for the full
//! reply.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::core::decoder::{EventStreamFramer, Utf8ChunkDecoder};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced a response (DNS, refused connection, ...).
    #[error("could not reach {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The relay answered with a non-success status before any body was read.
    #[error("relay responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The connection dropped after the body started.
    #[error("connection lost mid-stream: {0}")]
    Interrupted(#[source] reqwest::Error),

    /// Nothing arrived within the idle window.
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Build the HTTP client shared by every exchange.
pub fn build_client(options: &TransportOptions) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(options.connect_timeout)
        .build()
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// POST `payload` to `endpoint` and return the response body as text chunks.
pub async fn open_stream<P: Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    payload: &P,
    options: &TransportOptions,
) -> Result<ChunkStream, TransportError> {
    let request = client.post(endpoint).json(payload).send();
    let response = match tokio::time::timeout(options.idle_timeout, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                url: endpoint.to_string(),
                source,
            })
        }
        Err(_) => return Err(TransportError::IdleTimeout(options.idle_timeout)),
    };

    let status = response.status();
    if !status.is_success() {
        let body = match tokio::time::timeout(options.idle_timeout, response.text()).await {
            Ok(Ok(text)) => text,
            _ => "<no body>".to_string(),
        };
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }

    let event_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_event_stream_content_type);
    debug!(%endpoint, status = status.as_u16(), event_stream, "stream opened");

    Ok(ChunkStream::new(
        Box::pin(response.bytes_stream()),
        event_stream,
        options.idle_timeout,
    ))
}

/// Finite, non-restartable sequence of decoded text chunks.
pub struct ChunkStream {
    body: Option<ByteStream>,
    decoder: Utf8ChunkDecoder,
    framer: Option<EventStreamFramer>,
    ready: VecDeque<String>,
    idle_timeout: Duration,
}

impl ChunkStream {
    fn new(body: ByteStream, event_stream: bool, idle_timeout: Duration) -> Self {
        Self {
            body: Some(body),
            decoder: Utf8ChunkDecoder::new(),
            framer: event_stream.then(EventStreamFramer::new),
            ready: VecDeque::new(),
            idle_timeout,
        }
    }

    /// Next decoded chunk; `None` once the body has ended or the stream was
    /// closed. After an error the stream yields nothing further.
    pub async fn next_chunk(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                return Some(Ok(chunk));
            }

            let body = self.body.as_mut()?;
            match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(Some(Ok(bytes))) => {
                    let text = self.decoder.decode(&bytes);
                    self.push_text(text);
                }
                Ok(Some(Err(err))) => {
                    self.close();
                    return Some(Err(TransportError::Interrupted(err)));
                }
                Ok(None) => {
                    self.body = None;
                    let tail = self.decoder.finish();
                    self.push_text(tail);
                    if let Some(event) = self.framer.as_mut().and_then(EventStreamFramer::finish) {
                        self.ready.push_back(event);
                    }
                }
                Err(_) => {
                    self.close();
                    return Some(Err(TransportError::IdleTimeout(self.idle_timeout)));
                }
            }
        }
    }

    /// Release the underlying connection. Pending decoded chunks are dropped.
    pub fn close(&mut self) {
        self.body = None;
        self.ready.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.body.is_none() && self.ready.is_empty()
    }

    fn push_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        match self.framer.as_mut() {
            Some(framer) => self.ready.extend(framer.feed(&text)),
            None => self.ready.push_back(text),
        }
    }
}
