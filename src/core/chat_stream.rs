use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::QueryRequest;
use crate::core::transport::{open_stream, TransportError, TransportOptions};

#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub payload: QueryRequest,
    pub options: TransportOptions,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

pub fn format_transport_error(error: &TransportError) -> String {
    match error {
        TransportError::Status { status, body } if body.is_empty() => {
            format!("Relay error: HTTP {status}")
        }
        TransportError::Status { status, body } => {
            format!("Relay error: HTTP {status}\n```\n{body}\n```")
        }
        other => format!("Relay error: {other}"),
    }
}

/// Runs each exchange's stream on its own task and funnels decoded chunks
/// back to the owner of the chat session, tagged with the stream id.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) -> tokio::task::JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                endpoint,
                payload,
                options,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = async {
                    let mut chunks = match open_stream(&client, &endpoint, &payload, &options).await {
                        Ok(chunks) => chunks,
                        Err(err) => {
                            warn!(stream_id, status = err.status(), error = %err, "stream failed to open");
                            let _ = tx.send((StreamMessage::Error(format_transport_error(&err)), stream_id));
                            let _ = tx.send((StreamMessage::End, stream_id));
                            return;
                        }
                    };

                    while let Some(chunk) = chunks.next_chunk().await {
                        match chunk {
                            Ok(text) => {
                                if tx.send((StreamMessage::Chunk(text), stream_id)).is_err() {
                                    chunks.close();
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(stream_id, error = %err, "stream interrupted");
                                let _ = tx.send((StreamMessage::Error(format_transport_error(&err)), stream_id));
                                let _ = tx.send((StreamMessage::End, stream_id));
                                return;
                            }
                        }
                    }

                    let _ = tx.send((StreamMessage::End, stream_id));
                } => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "stream cancelled");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn params(endpoint: String, cancel_token: CancellationToken, stream_id: u64) -> StreamParams {
        StreamParams {
            client: reqwest::Client::builder()
                .no_proxy()
                .build()
                .expect("client"),
            endpoint,
            payload: QueryRequest {
                session_id: "s".into(),
                text: "hi".into(),
                patient_id: None,
            },
            options: TransportOptions {
                connect_timeout: Duration::from_secs(2),
                idle_timeout: Duration::from_secs(2),
            },
            cancel_token,
            stream_id,
        }
    }

    #[tokio::test]
    async fn chunks_then_end_are_tagged_with_stream_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let body = "hello";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.expect("write");
        });

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(params(format!("http://{addr}/q"), CancellationToken::new(), 7));

        let (message, id) = rx.recv().await.expect("chunk");
        assert_eq!(id, 7);
        assert!(matches!(message, StreamMessage::Chunk(ref text) if text == "hello"));
        let (message, id) = rx.recv().await.expect("end");
        assert_eq!(id, 7);
        assert!(matches!(message, StreamMessage::End));
    }

    #[tokio::test]
    async fn open_failure_reports_error_then_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(params(format!("http://{addr}/q"), CancellationToken::new(), 3));

        let (message, _) = rx.recv().await.expect("error");
        match message {
            StreamMessage::Error(text) => assert!(text.starts_with("Relay error:")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some((StreamMessage::End, 3))));
    }

    #[tokio::test]
    async fn cancellation_stops_the_task_without_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let token = CancellationToken::new();
        let (service, mut rx) = ChatStreamService::new();
        let handle = service.spawn_stream(params(format!("http://{addr}/q"), token.clone(), 1));
        token.cancel();
        handle.await.expect("task joins");
        drop(service);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn status_errors_include_body_in_a_fence() {
        let error = TransportError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(format_transport_error(&error), "Relay error: HTTP 500\n```\nboom\n```");
        let bare = TransportError::Status {
            status: 502,
            body: String::new(),
        };
        assert_eq!(format_transport_error(&bare), "Relay error: HTTP 502");
    }
}
