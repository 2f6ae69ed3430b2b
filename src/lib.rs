//! patient-chat is a streaming chat client and relay for an LLM intake
//! assistant that gathers a patient's medical history.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the chat log, the streaming transport, completion
//!   detection, the notification bus, and the review follow-up.
//! - [`relay`] is the HTTP pass-through that forwards chat queries to the
//!   LLM service and streams its reply back unchanged.
//! - [`api`] defines the wire payloads shared by client and relay.
//! - [`cli`] parses arguments and runs the relay or a chat front end.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod relay;
pub mod utils;
