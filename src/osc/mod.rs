//! OSC (Open Sound Control): remote display clients and remote line input.

pub mod client;
pub mod listener;
pub mod message;

pub use client::RemoteClient;
pub use listener::{OscListener, RemoteInput};
