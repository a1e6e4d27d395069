//! MIDI output: note events, articulation programs, pitch bend and clock.

pub mod message;
pub mod output;

pub use output::{list_ports, MidiSink, MidiWrite};
