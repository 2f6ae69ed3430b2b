//! Line-oriented interactive chat.
//!
//! Replies are printed as chunks arrive; messages injected through the bus
//! (review progress) are printed with a `## ` prefix.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use crate::cli::ClientSetup;
use crate::core::assets::AssetClient;
use crate::core::chat_stream::StreamMessage;
use crate::core::exchange::{ChatController, ExchangeUpdate};
use crate::core::message::ChatMessage;
use crate::core::session::{SubmitError, CANCELLED_MARKER, ERROR_MARKER};

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Quit,
    Status,
    Clear,
    Cancel,
    Image,
    Log(Option<&'a str>),
    Unknown(&'a str),
    Message(&'a str),
}

fn parse_line(line: &str) -> ChatCommand<'_> {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatCommand::Message(trimmed);
    };
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "exit" => ChatCommand::Quit,
        "status" => ChatCommand::Status,
        "clear" => ChatCommand::Clear,
        "cancel" => ChatCommand::Cancel,
        "image" => ChatCommand::Image,
        "log" if rest.is_empty() => ChatCommand::Log(None),
        "log" => ChatCommand::Log(Some(rest)),
        _ => ChatCommand::Unknown(name),
    }
}

pub async fn run_chat(client: ClientSetup) -> Result<(), Box<dyn Error>> {
    let ClientSetup {
        mut controller,
        mut stream_rx,
        mut bus_rx,
        assets,
        ..
    } = client;

    let identity = controller.session().identity();
    eprintln!(
        "💬 Chatting about patient {} (session {}). /quit to exit.",
        identity.patient_id(),
        identity.session_id()
    );

    let lines = BufReader::new(tokio::io::stdin()).lines();
    chat_loop(&mut controller, &mut stream_rx, &mut bus_rx, &assets, lines).await?;

    controller.cancel();
    Ok(())
}

/// Drives input lines, stream updates, and bus messages until the user quits.
/// When input ends, the reply in flight is still read to the end.
async fn chat_loop<R>(
    controller: &mut ChatController,
    stream_rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    bus_rx: &mut broadcast::Receiver<ChatMessage>,
    assets: &AssetClient,
    mut lines: Lines<R>,
) -> Result<(), Box<dyn Error>>
where
    R: AsyncBufRead + Unpin,
{
    let mut input_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    input_open = false;
                    if !controller.session().is_streaming() {
                        break;
                    }
                    continue;
                };
                if parse_line(&line) == ChatCommand::Image {
                    let patient_id = controller.session().identity().patient_id().to_string();
                    match assets.image_url(&patient_id).await {
                        Ok(url) => println!("{url}"),
                        Err(e) => eprintln!("❌ {e}"),
                    }
                } else if !handle_line(controller, &line)? {
                    break;
                }
            }
            Some((message, stream_id)) = stream_rx.recv() => {
                print_stream_update(controller, message, stream_id)?;
                if !input_open && !controller.session().is_streaming() {
                    break;
                }
            }
            message = bus_rx.recv() => match message {
                Ok(message) => {
                    println!("## {}", message.text);
                    controller.handle_bus_message(message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("⚠️  Missed {skipped} status messages");
                }
                Err(RecvError::Closed) => {}
            },
        }
    }
    Ok(())
}

/// Returns `false` when the user asked to quit.
fn handle_line(controller: &mut ChatController, line: &str) -> Result<bool, Box<dyn Error>> {
    match parse_line(line) {
        ChatCommand::Quit => return Ok(false),
        ChatCommand::Status => {
            let complete = controller.bus().history_complete();
            println!(
                "History: {}. Streaming: {}. Logging: {}.",
                if complete { "complete" } else { "in progress" },
                if controller.session().is_streaming() { "yes" } else { "no" },
                controller.transcript().get_status_string()
            );
        }
        ChatCommand::Clear => {
            controller.clear();
            println!("Conversation cleared.");
        }
        ChatCommand::Cancel => {
            if controller.cancel() {
                println!("{CANCELLED_MARKER}");
            }
        }
        ChatCommand::Log(Some(path)) => match controller.transcript_mut().set_log_file(path.to_string()) {
            Ok(status) => println!("{status}"),
            Err(e) => eprintln!("❌ {e}"),
        },
        ChatCommand::Log(None) => match controller.transcript_mut().toggle_logging() {
            Ok(status) => println!("{status}"),
            Err(e) => eprintln!("❌ {e}"),
        },
        // Needs the asset client; handled in the chat loop.
        ChatCommand::Image => {}
        ChatCommand::Unknown(name) => eprintln!("❌ Unknown command: /{name}"),
        ChatCommand::Message(text) => match controller.submit(text) {
            Ok(_) => {}
            Err(SubmitError::EmptyMessage) => {}
            Err(err @ SubmitError::ExchangeInFlight) => eprintln!("⚠️  {err}"),
        },
    }
    Ok(true)
}

fn print_stream_update(
    controller: &mut ChatController,
    message: StreamMessage,
    stream_id: u64,
) -> Result<(), Box<dyn Error>> {
    let chunk = match &message {
        StreamMessage::Chunk(text) => Some(text.clone()),
        _ => None,
    };
    match controller.handle_stream_message(message, stream_id) {
        ExchangeUpdate::Appended { .. } => {
            if let Some(text) = chunk {
                print!("{text}");
                io::stdout().flush()?;
            }
        }
        ExchangeUpdate::Failed { reason } => {
            println!("{ERROR_MARKER}");
            eprintln!("❌ {reason}");
        }
        ExchangeUpdate::Finished => println!("\n"),
        ExchangeUpdate::Ignored => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::core::config::Config;
    use clap::Parser;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn slow_relay(chunks: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 8192];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/plain; charset=utf-8\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .expect("head");
            for chunk in chunks {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
                stream.write_all(frame.as_bytes()).await.expect("chunk");
                stream.flush().await.expect("flush");
            }
            stream.write_all(b"0\r\n\r\n").await.expect("trailer");
        });
        format!("http://{addr}")
    }

    #[test]
    fn parses_commands_and_messages() {
        assert_eq!(parse_line("/quit"), ChatCommand::Quit);
        assert_eq!(parse_line("  /status "), ChatCommand::Status);
        assert_eq!(parse_line("/log"), ChatCommand::Log(None));
        assert_eq!(parse_line("/log  chat.txt"), ChatCommand::Log(Some("chat.txt")));
        assert_eq!(parse_line("/image"), ChatCommand::Image);
        assert_eq!(parse_line("/nope"), ChatCommand::Unknown("nope"));
        assert_eq!(
            parse_line("  I have a headache  "),
            ChatCommand::Message("I have a headache")
        );
    }

    #[tokio::test]
    async fn piped_input_waits_for_the_reply_in_flight() {
        let relay = slow_relay(vec!["The patient ", "is on ", "metformin."]).await;
        let args = Args::try_parse_from(["patient-chat", "chat", "-p", "p-1", "--relay-url", &relay])
            .expect("parse");
        let ClientSetup {
            mut controller,
            mut stream_rx,
            mut bus_rx,
            assets,
            ..
        } = ClientSetup::connect(&args, &Config::default()).expect("setup");

        let input: &[u8] = b"What medications?\n";
        let lines = BufReader::new(input).lines();
        tokio::time::timeout(
            Duration::from_secs(5),
            chat_loop(&mut controller, &mut stream_rx, &mut bus_rx, &assets, lines),
        )
        .await
        .expect("loop finished")
        .expect("loop ok");

        let session = controller.session();
        assert!(!session.is_streaming());
        let reply = session.messages().back().expect("reply");
        assert!(reply.is_assistant());
        assert_eq!(reply.text, "The patient is on metformin.");
    }

    #[tokio::test]
    async fn empty_input_ends_the_loop() {
        let args = Args::try_parse_from(["patient-chat", "chat", "-p", "p-1"]).expect("parse");
        let ClientSetup {
            mut controller,
            mut stream_rx,
            mut bus_rx,
            assets,
            ..
        } = ClientSetup::connect(&args, &Config::default()).expect("setup");

        let input: &[u8] = b"/status\n";
        let lines = BufReader::new(input).lines();
        tokio::time::timeout(
            Duration::from_secs(2),
            chat_loop(&mut controller, &mut stream_rx, &mut bus_rx, &assets, lines),
        )
        .await
        .expect("loop finished")
        .expect("loop ok");
        assert!(controller.session().messages().is_empty());
    }
}
