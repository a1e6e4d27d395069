//! Output sinks: the capability set the scheduler drives.
//!
//! Sound sinks (MIDI, an external synthesis engine) act on note events;
//! display sinks (remote clients) mostly act on [`Notification`]s. Every
//! method has a no-op default so a sink only implements what it renders.

pub mod recorder;

use std::time::Duration;

use thiserror::Error;

use crate::score::event::{Articulation, TextMark};

pub use recorder::{RecordingSink, SinkCall};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("midi error: {0}")]
    Midi(String),
    #[error("osc error: {0}")]
    Osc(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifies an attached sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkKey {
    Midi(usize),
    Remote(String),
    Engine(u32),
    /// Sinks attached by embedding code, such as test recorders.
    Custom(String),
}

/// The instrument an event belongs to, as a sink sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkTarget {
    pub instrument: usize,
    /// 0-based MIDI channel; ignored by non-MIDI sinks.
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Start,
    Stop,
}

/// Score and transport changes broadcast to every sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A bar starts playing.
    Bar { index: usize, name: String },
    /// The loop position changed (0-based).
    LoopIndex { loop_index: usize, position: usize },
    /// A meter beat, counted from 1.
    Beat { beat: u32, beats: u32 },
    /// Beat information for display clients: beat length in ms and meter.
    BeatInfo { ms: f64, num: u32, den: u32 },
    Countdown(u32),
    Finished,
    /// Compiled source of one instrument in a bar.
    Line {
        instrument: usize,
        name: String,
        bar: usize,
        text: String,
    },
    /// Playback step of one instrument.
    Sequence { instrument: usize, step: usize },
    MeterChanged { num: u32, den: u32 },
    TempoChanged { bpm: f64 },
    GroupChanged { name: String, members: Vec<String> },
    Clef { instrument: usize, clef: i32 },
}

/// Output capability set. All pitches are MIDI numbers, quarter tones allowed.
pub trait Sink: Send {
    fn note_on(&mut self, _target: SinkTarget, _pitches: &[f32], _velocity: u8) -> Result<(), SinkError> {
        Ok(())
    }

    fn note_off(&mut self, _target: SinkTarget, _pitches: &[f32]) -> Result<(), SinkError> {
        Ok(())
    }

    /// Intermediate glissando pitches.
    fn glide(&mut self, _target: SinkTarget, _pitches: &[f32]) -> Result<(), SinkError> {
        Ok(())
    }

    fn rest(&mut self, _target: SinkTarget) -> Result<(), SinkError> {
        Ok(())
    }

    /// Stop everything this instrument sounds.
    fn silence(&mut self, _target: SinkTarget) -> Result<(), SinkError> {
        Ok(())
    }

    fn set_dynamic(&mut self, _target: SinkTarget, _level: f32) -> Result<(), SinkError> {
        Ok(())
    }

    fn set_articulation(&mut self, _target: SinkTarget, _articulations: &[Articulation]) -> Result<(), SinkError> {
        Ok(())
    }

    fn set_text(&mut self, _target: SinkTarget, _text: &TextMark) -> Result<(), SinkError> {
        Ok(())
    }

    fn clock_pulse(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn transport(&mut self, _signal: TransportSignal) -> Result<(), SinkError> {
        Ok(())
    }

    fn notify(&mut self, _notification: &Notification) -> Result<(), SinkError> {
        Ok(())
    }

    /// A user-typed message for remote clients.
    fn send_raw(&mut self, _addr: &str, _args: &[String]) -> Result<(), SinkError> {
        Ok(())
    }

    /// Latency applied before anything this sink sends leaves.
    fn set_delay(&mut self, _delay_ms: u32) {}

    /// Called once per scheduler tick; sinks with send queues drain here.
    fn flush(&mut self, _now: Duration) -> Result<(), SinkError> {
        Ok(())
    }
}
