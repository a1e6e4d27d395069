//! scorelive is a live-coding score language that plays bars and loops of
//! notation over MIDI and OSC while they are being edited.

pub mod command;
pub mod dsl;
pub mod midi;
pub mod osc;
pub mod scheduler;
pub mod score;
pub mod session;
pub mod sink;

pub use dsl::error::{ParseError, Severity};
pub use session::{LineResult, Session, SessionConfig};
