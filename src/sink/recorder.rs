//! A sink that records every call, for tests and dry runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Notification, Sink, SinkError, SinkTarget, TransportSignal};
use crate::score::event::{Articulation, TextMark};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    NoteOn {
        instrument: usize,
        pitches: Vec<f32>,
        velocity: u8,
    },
    NoteOff {
        instrument: usize,
        pitches: Vec<f32>,
    },
    Glide {
        instrument: usize,
        pitches: Vec<f32>,
    },
    Rest(usize),
    Silence(usize),
    Dynamic(usize, f32),
    Articulation(usize, Vec<Articulation>),
    Text(usize, String),
    ClockPulse,
    Transport(TransportSignal),
    Notify(Notification),
}

/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn note_ons(&self) -> Vec<(usize, Vec<f32>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::NoteOn {
                    instrument,
                    pitches,
                    ..
                } => Some((instrument, pitches)),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: SinkCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Sink for RecordingSink {
    fn note_on(&mut self, target: SinkTarget, pitches: &[f32], velocity: u8) -> Result<(), SinkError> {
        self.push(SinkCall::NoteOn {
            instrument: target.instrument,
            pitches: pitches.to_vec(),
            velocity,
        });
        Ok(())
    }

    fn note_off(&mut self, target: SinkTarget, pitches: &[f32]) -> Result<(), SinkError> {
        self.push(SinkCall::NoteOff {
            instrument: target.instrument,
            pitches: pitches.to_vec(),
        });
        Ok(())
    }

    fn glide(&mut self, target: SinkTarget, pitches: &[f32]) -> Result<(), SinkError> {
        self.push(SinkCall::Glide {
            instrument: target.instrument,
            pitches: pitches.to_vec(),
        });
        Ok(())
    }

    fn rest(&mut self, target: SinkTarget) -> Result<(), SinkError> {
        self.push(SinkCall::Rest(target.instrument));
        Ok(())
    }

    fn silence(&mut self, target: SinkTarget) -> Result<(), SinkError> {
        self.push(SinkCall::Silence(target.instrument));
        Ok(())
    }

    fn set_dynamic(&mut self, target: SinkTarget, level: f32) -> Result<(), SinkError> {
        self.push(SinkCall::Dynamic(target.instrument, level));
        Ok(())
    }

    fn set_articulation(&mut self, target: SinkTarget, articulations: &[Articulation]) -> Result<(), SinkError> {
        self.push(SinkCall::Articulation(target.instrument, articulations.to_vec()));
        Ok(())
    }

    fn set_text(&mut self, target: SinkTarget, text: &TextMark) -> Result<(), SinkError> {
        self.push(SinkCall::Text(target.instrument, text.text.clone()));
        Ok(())
    }

    fn clock_pulse(&mut self) -> Result<(), SinkError> {
        self.push(SinkCall::ClockPulse);
        Ok(())
    }

    fn transport(&mut self, signal: TransportSignal) -> Result<(), SinkError> {
        self.push(SinkCall::Transport(signal));
        Ok(())
    }

    fn notify(&mut self, notification: &Notification) -> Result<(), SinkError> {
        self.push(SinkCall::Notify(notification.clone()));
        Ok(())
    }

    fn flush(&mut self, _now: Duration) -> Result<(), SinkError> {
        Ok(())
    }
}
