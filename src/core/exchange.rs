//! Drives exchanges end to end: submit into the session, stream the reply,
//! and react when the intake is complete.
//!
//! The controller is owned by a single task. Stream tasks report back over the
//! channel returned from [`ChatController::new`]; the owner feeds those into
//! [`ChatController::handle_stream_message`], and feeds bus chat messages into
//! [`ChatController::handle_bus_message`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::bus::NotificationBus;
use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::identity::SessionIdentity;
use crate::core::message::ChatMessage;
use crate::core::review::ReviewOrchestrator;
use crate::core::session::{ChatSession, CompletionEvent, SubmitError};
use crate::core::transport::TransportOptions;
use crate::utils::logging::LoggingState;
use crate::utils::url::construct_api_url;

pub const QUERY_ENDPOINT: &str = "api/patient/query";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeUpdate {
    /// Message belonged to a stream that is no longer current.
    Ignored,
    Appended { completion: Option<CompletionEvent> },
    Finished,
    Failed { reason: String },
}

pub struct ChatController {
    session: ChatSession,
    bus: NotificationBus,
    stream_service: ChatStreamService,
    client: reqwest::Client,
    query_url: String,
    options: TransportOptions,
    review: Option<Arc<ReviewOrchestrator>>,
    transcript: LoggingState,
}

impl ChatController {
    pub fn new(
        identity: SessionIdentity,
        client: reqwest::Client,
        relay_url: &str,
        options: TransportOptions,
        bus: NotificationBus,
    ) -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (stream_service, rx) = ChatStreamService::new();
        let controller = Self {
            session: ChatSession::new(identity),
            bus,
            stream_service,
            client,
            query_url: construct_api_url(relay_url, QUERY_ENDPOINT),
            options,
            review: None,
            transcript: LoggingState::disabled(),
        };
        (controller, rx)
    }

    pub fn with_review(mut self, review: Arc<ReviewOrchestrator>) -> Self {
        self.review = Some(review);
        self
    }

    pub fn with_transcript(mut self, transcript: LoggingState) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn transcript(&self) -> &LoggingState {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut LoggingState {
        &mut self.transcript
    }

    /// Start an exchange and return its stream id.
    pub fn submit(&mut self, text: &str) -> Result<u64, SubmitError> {
        let ticket = self.session.submit(text)?;
        if let Some(user) = self.session.messages().iter().rev().nth(1) {
            self.log_transcript(user);
        }

        self.stream_service.spawn_stream(StreamParams {
            client: self.client.clone(),
            endpoint: self.query_url.clone(),
            payload: ticket.payload,
            options: self.options,
            cancel_token: ticket.cancel_token,
            stream_id: ticket.stream_id,
        });
        Ok(ticket.stream_id)
    }

    pub fn handle_stream_message(&mut self, message: StreamMessage, stream_id: u64) -> ExchangeUpdate {
        if !self.session.is_current_stream(stream_id) {
            return ExchangeUpdate::Ignored;
        }

        match message {
            StreamMessage::Chunk(text) => {
                let completion = self.session.apply_chunk(stream_id, &text);
                if let Some(event) = completion {
                    self.on_history_complete(event);
                }
                ExchangeUpdate::Appended { completion }
            }
            StreamMessage::Error(reason) => {
                warn!(stream_id, %reason, "exchange failed");
                let failed = self.session.fail(stream_id).cloned();
                if let Some(message) = failed {
                    self.log_transcript(&message);
                }
                ExchangeUpdate::Failed { reason }
            }
            StreamMessage::End => {
                let finished = self.session.complete(stream_id).cloned();
                if let Some(message) = finished {
                    self.log_transcript(&message);
                }
                ExchangeUpdate::Finished
            }
        }
    }

    /// Append a message published on the bus to the log.
    pub fn handle_bus_message(&mut self, message: ChatMessage) {
        self.log_transcript(&message);
        self.session.push_system(message);
    }

    pub fn cancel(&mut self) -> bool {
        let cancelled = self.session.cancel().cloned();
        match cancelled {
            Some(message) => {
                self.log_transcript(&message);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.session.clear();
        if let Err(err) = self.transcript.rewrite_log(self.session.messages()) {
            warn!(error = %err, "failed to rewrite transcript");
        }
    }

    fn on_history_complete(&self, event: CompletionEvent) {
        info!(message_id = %event.message_id, "patient history collected");
        self.bus.set_history_complete(true);
        if let Some(review) = &self.review {
            review.spawn_analysis(self.session.identity().patient_id().to_string());
        }
    }

    fn log_transcript(&self, message: &ChatMessage) {
        if let Err(err) = self.transcript.log_chat_message(message) {
            warn!(error = %err, "failed to write transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::review::{AnalysisError, AnalysisTrigger, ANALYZING_MESSAGE, SENT_FOR_REVIEW_MESSAGE};
    use crate::core::session::ERROR_MARKER;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn chunked_relay(status_line: &'static str, chunks: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 8192];
            let _ = stream.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/plain; charset=utf-8\r\ntransfer-encoding: chunked\r\n\r\n"
            );
            stream.write_all(head.as_bytes()).await.expect("head");
            for chunk in chunks {
                let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
                stream.write_all(frame.as_bytes()).await.expect("chunk");
                stream.flush().await.expect("flush");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stream.write_all(b"0\r\n\r\n").await.expect("trailer");
        });
        format!("http://{addr}")
    }

    fn controller(relay_url: &str, bus: NotificationBus) -> (ChatController, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client");
        ChatController::new(
            SessionIdentity::new("session-1", "patient-1"),
            client,
            relay_url,
            TransportOptions {
                connect_timeout: Duration::from_secs(2),
                idle_timeout: Duration::from_secs(2),
            },
            bus,
        )
    }

    async fn drive(
        controller: &mut ChatController,
        rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    ) -> Vec<ExchangeUpdate> {
        let mut updates = Vec::new();
        while let Some((message, stream_id)) = rx.recv().await {
            let update = controller.handle_stream_message(message, stream_id);
            let done = matches!(update, ExchangeUpdate::Finished);
            updates.push(update);
            if done || !controller.session().is_streaming() {
                break;
            }
        }
        updates
    }

    #[tokio::test]
    async fn streamed_reply_is_assembled_without_completion() {
        let relay = chunked_relay("200 OK", vec!["The patient ", "is on ", "metformin."]).await;
        let bus = NotificationBus::new();
        let (mut controller, mut rx) = controller(&relay, bus.clone());

        controller
            .submit("What medications is the patient on?")
            .expect("submit");
        let updates = drive(&mut controller, &mut rx).await;

        assert_eq!(updates.last(), Some(&ExchangeUpdate::Finished));
        assert!(updates
            .iter()
            .all(|u| !matches!(u, ExchangeUpdate::Appended { completion: Some(_) })));
        let reply = controller.session().messages().back().expect("reply");
        assert_eq!(reply.text, "The patient is on metformin.");
        assert!(!bus.history_complete());
        assert!(controller.session().pending_input().is_empty());
    }

    #[tokio::test]
    async fn relay_error_marks_the_reply() {
        let relay = chunked_relay("500 Internal Server Error", vec!["upstream exploded"]).await;
        let (mut controller, mut rx) = controller(&relay, NotificationBus::new());

        controller.submit("hello").expect("submit");
        let updates = drive(&mut controller, &mut rx).await;

        match updates.first() {
            Some(ExchangeUpdate::Failed { reason }) => assert!(reason.contains("500")),
            other => panic!("expected failure, got {other:?}"),
        }
        let reply = controller.session().messages().back().expect("reply");
        assert_eq!(reply.text, ERROR_MARKER);
        assert_eq!(controller.session().pending_input(), "hello");
        assert!(!controller.session().is_streaming());
    }

    struct AcceptingTrigger;

    #[async_trait]
    impl AnalysisTrigger for AcceptingTrigger {
        async fn trigger(&self, _patient_id: &str) -> Result<(), AnalysisError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn completion_sets_flag_and_runs_review() {
        let relay = chunked_relay(
            "200 OK",
            vec!["Thanks! I\u{2019}ve collected ", "everything I need.", " A doctor will follow up."],
        )
        .await;
        let bus = NotificationBus::new();
        let mut chat_rx = bus.subscribe_chat();
        let review = Arc::new(ReviewOrchestrator::new(Arc::new(AcceptingTrigger), bus.clone()));
        let (controller, mut rx) = controller(&relay, bus.clone());
        let mut controller = controller.with_review(review);

        controller.submit("No other symptoms.").expect("submit");
        let updates = drive(&mut controller, &mut rx).await;

        let completions = updates
            .iter()
            .filter(|u| matches!(u, ExchangeUpdate::Appended { completion: Some(_) }))
            .count();
        assert_eq!(completions, 1);
        assert!(bus.history_complete());

        for expected in [ANALYZING_MESSAGE, SENT_FOR_REVIEW_MESSAGE] {
            let message = tokio::time::timeout(Duration::from_secs(2), chat_rx.recv())
                .await
                .expect("bus message in time")
                .expect("bus open");
            assert_eq!(message.text, expected);
            controller.handle_bus_message(message);
        }
        let texts: Vec<_> = controller
            .session()
            .messages()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(&texts[2..], &[ANALYZING_MESSAGE, SENT_FOR_REVIEW_MESSAGE]);
    }

    #[tokio::test]
    async fn stale_stream_messages_are_ignored() {
        let (mut controller, _rx) = controller("http://127.0.0.1:9", NotificationBus::new());
        assert_eq!(
            controller.handle_stream_message(StreamMessage::Chunk("late".into()), 42),
            ExchangeUpdate::Ignored
        );
        assert!(controller.session().messages().is_empty());
    }

    #[tokio::test]
    async fn cancel_marks_reply_and_allows_resubmit() {
        let (mut controller, _rx) = controller("http://127.0.0.1:9", NotificationBus::new());
        controller.submit("hello").expect("submit");
        assert!(controller.cancel());
        assert!(!controller.cancel());
        assert!(!controller.session().is_streaming());
    }
}
