pub mod assets;
pub mod bus;
pub mod chat_stream;
pub mod config;
pub mod decoder;
pub mod exchange;
pub mod identity;
pub mod message;
pub mod review;
pub mod sentinel;
pub mod session;
pub mod transport;
