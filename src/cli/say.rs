//! Non-interactive "say" command

use std::error::Error;
use std::io::{self, Write};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::cli::ClientSetup;
use crate::core::chat_stream::StreamMessage;
use crate::core::exchange::{ChatController, ExchangeUpdate};
use crate::core::message::ChatMessage;
use crate::core::review::{ANALYSIS_FAILED_MESSAGE, SENT_FOR_REVIEW_MESSAGE};

pub async fn run_say(prompt: String, client: ClientSetup) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: patient-chat say <prompt>");
        std::process::exit(1);
    }

    let ClientSetup {
        mut controller,
        mut stream_rx,
        mut bus_rx,
        idle_timeout,
        ..
    } = client;

    controller.submit(&prompt)?;

    loop {
        let Some((message, stream_id)) = stream_rx.recv().await else {
            break;
        };
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
                eprintln!("\n\n❌ Error: {reason}");
                std::process::exit(1);
            }
            ExchangeUpdate::Finished => {
                println!();
                break;
            }
            ExchangeUpdate::Ignored => {}
        }
    }

    if controller.bus().history_complete() {
        wait_for_review(&mut controller, &mut bus_rx, idle_timeout).await?;
    }

    Ok(())
}

/// Print review progress until the analysis reports an outcome.
async fn wait_for_review(
    controller: &mut ChatController,
    bus_rx: &mut broadcast::Receiver<ChatMessage>,
    idle_timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    loop {
        let message = match tokio::time::timeout(idle_timeout, bus_rx.recv()).await {
            Ok(Ok(message)) => message,
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) | Err(_) => return Ok(()),
        };
        println!("## {}", message.text);
        let done = message.text == SENT_FOR_REVIEW_MESSAGE;
        let failed = message.text == ANALYSIS_FAILED_MESSAGE;
        controller.handle_bus_message(message);
        if failed {
            return Err(ANALYSIS_FAILED_MESSAGE.into());
        }
        if done {
            return Ok(());
        }
    }
}
