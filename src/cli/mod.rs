//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod say;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::core::assets::AssetClient;
use crate::core::bus::NotificationBus;
use crate::core::chat_stream::StreamMessage;
use crate::core::config::Config;
use crate::core::exchange::ChatController;
use crate::core::identity::SessionIdentity;
use crate::core::message::ChatMessage;
use crate::core::review::{HttpAnalysisTrigger, ReviewOrchestrator};
use crate::core::transport::build_client;
use crate::utils::logging::LoggingState;

#[derive(Parser)]
#[command(name = "patient-chat")]
#[command(about = "Patient history chat client and streaming relay")]
#[command(
    long_about = "patient-chat talks to an LLM intake assistant about a patient's history. \
The relay forwards chat queries to the answer-generation service and streams the reply \
back as it is produced; the chat client prints replies as they arrive and hands the \
gathered history off for doctor review once the assistant says it has everything.\n\n\
Environment Variables:\n\
  PATIENT_CHAT_BIND                 Relay listen address (default 127.0.0.1:5268)\n\
  PATIENT_CHAT_UPSTREAM_URL         Answer-generation service base URL\n\
  PATIENT_CHAT_RELAY_URL            Relay base URL used by the chat client\n\
  PATIENT_CHAT_ANALYSIS_URL         Analysis service base URL\n\
  PATIENT_CHAT_PATIENT_ID           Patient the chat client is about\n\
  PATIENT_CHAT_IDLE_TIMEOUT_SECS    Per-chunk idle timeout on both hops\n\
  PATIENT_CHAT_CONNECT_TIMEOUT_SECS Connect timeout\n\
  PATIENT_CHAT_LOG                  Tracing filter (RUST_LOG wins)\n\
  PATIENT_CHAT_LOG_JSON             Emit JSON logs\n\
  PATIENT_CHAT_CORS_ORIGINS         Comma separated CORS origins for the relay\n\n\
Commands (chat):\n\
  /status           Show whether the patient history is complete\n\
  /clear            Clear the conversation\n\
  /cancel           Stop the reply that is streaming\n\
  /image            Print the URL of the patient's latest study image\n\
  /log <filename>   Enable logging to specified file\n\
  /log              Toggle logging pause/resume\n\
  /quit             Exit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to a config file (defaults to the platform config directory)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session id sent with every query; a fresh one is generated by default
    #[arg(long, global = true)]
    pub session_id: Option<String>,

    /// Patient the conversation is about
    #[arg(short = 'p', long, global = true)]
    pub patient_id: Option<String>,

    /// Relay base URL
    #[arg(long, global = true)]
    pub relay_url: Option<String>,

    /// Enable transcript logging to specified file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming relay
    Relay,
    /// Start an interactive chat (default)
    Chat,
    /// Send a single message and print the reply
    Say {
        /// The message to send
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Config::resolve(args.config.as_deref())?;
    init_tracing(&config);

    match args.command {
        Some(Commands::Relay) => crate::relay::serve(&config).await,
        Some(Commands::Say { ref prompt }) => {
            let prompt = prompt.join(" ");
            let client = ClientSetup::connect(&args, &config)?;
            run_say(prompt, client).await
        }
        Some(Commands::Chat) | None => {
            let client = ClientSetup::connect(&args, &config)?;
            run_chat(client).await
        }
    }
}

/// Diagnostics go to stderr so stdout carries only the conversation.
fn init_tracing(config: &Config) {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match config.log_level.parse::<EnvFilter>() {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!(
                    "WARN: log level '{}' is not a valid tracing filter ({}); falling back to 'info'",
                    config.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if config.log_json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(e) = result {
        eprintln!("WARN: tracing already initialized: {e}");
    }
}

/// Everything a chat client front end drives.
pub struct ClientSetup {
    pub controller: ChatController,
    pub stream_rx: mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    pub bus_rx: broadcast::Receiver<ChatMessage>,
    pub assets: AssetClient,
    pub idle_timeout: std::time::Duration,
}

impl ClientSetup {
    pub fn connect(args: &Args, config: &Config) -> Result<Self, Box<dyn Error>> {
        let patient_id = args
            .patient_id
            .clone()
            .or_else(|| config.patient_id.clone())
            .filter(|id| !id.trim().is_empty())
            .ok_or("No patient selected. Pass --patient-id or set PATIENT_CHAT_PATIENT_ID.")?;
        let identity = match &args.session_id {
            Some(session_id) => SessionIdentity::new(session_id.clone(), patient_id),
            None => SessionIdentity::for_patient(patient_id),
        };

        let relay_url = args.relay_url.as_deref().unwrap_or(&config.relay_url);
        if !(relay_url.starts_with("http://") || relay_url.starts_with("https://")) {
            return Err(format!("Relay URL must start with http:// or https://, got {relay_url}").into());
        }

        let options = config.transport_options();
        let client = build_client(&options)?;
        let bus = NotificationBus::new();
        let bus_rx = bus.subscribe_chat();

        let trigger = HttpAnalysisTrigger::new(
            client.clone(),
            config.analysis_url.clone(),
            config.idle_timeout(),
        );
        let review = Arc::new(ReviewOrchestrator::new(Arc::new(trigger), bus.clone()));
        let assets = AssetClient::new(
            client.clone(),
            config.analysis_url.clone(),
            config.idle_timeout(),
        );
        let transcript = LoggingState::new(args.log.clone())?;

        let (controller, stream_rx) = ChatController::new(identity, client, relay_url, options, bus);
        let controller = controller.with_review(review).with_transcript(transcript);

        Ok(Self {
            controller,
            stream_rx,
            bus_rx,
            assets,
            idle_timeout: config.idle_timeout(),
        })
    }
}
