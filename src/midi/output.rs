//! MIDI output sink.

use std::collections::HashMap;

use midir::{MidiOutput, MidiOutputConnection};

use super::message;
use crate::score::event::Articulation;
use crate::sink::{Sink, SinkError, SinkTarget, TransportSignal};

/// Anything raw MIDI bytes can be written to.
pub trait MidiWrite: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;
}

impl MidiWrite for MidiOutputConnection {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.send(bytes).map_err(|e| SinkError::Midi(e.to_string()))
    }
}

impl MidiWrite for Vec<Vec<u8>> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.push(bytes.to_vec());
        Ok(())
    }
}

/// Renders note events as MIDI: program change for articulation, pitch bend
/// for quarter tones and glissandi, CC 120 for silence.
pub struct MidiSink<W: MidiWrite> {
    out: W,
    /// Keys held per channel, for note-offs and bend reference.
    held: HashMap<u8, Vec<u8>>,
}

impl<W: MidiWrite> MidiSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            held: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn writer(&self) -> &W {
        &self.out
    }
}

impl MidiSink<MidiOutputConnection> {
    /// Connect to the output port at `index`.
    pub fn open(index: usize) -> Result<Self, SinkError> {
        let midi_out =
            MidiOutput::new("scorelive").map_err(|e| SinkError::Midi(format!("MIDI init: {e}")))?;
        let ports = midi_out.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| SinkError::Midi(format!("no MIDI output port {index}")))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "unknown".to_string());
        let conn = midi_out
            .connect(port, "scorelive-out")
            .map_err(|e| SinkError::Midi(format!("MIDI connect: {e}")))?;
        tracing::info!(port = index, %name, "opened MIDI output");
        Ok(Self::new(conn))
    }
}

/// Names of all MIDI output ports, in index order.
pub fn list_ports() -> Vec<String> {
    let Ok(midi_out) = MidiOutput::new("scorelive-list") else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect()
}

impl<W: MidiWrite> Sink for MidiSink<W> {
    fn note_on(&mut self, target: SinkTarget, pitches: &[f32], velocity: u8) -> Result<(), SinkError> {
        let ch = target.channel;
        let mut keys = Vec::with_capacity(pitches.len());
        let mut bend = 0.0;
        for &pitch in pitches {
            let (key, offset) = message::split_pitch(pitch);
            if offset != 0.0 {
                bend = offset;
            }
            keys.push(key);
        }
        self.out.write(&message::pitch_bend(ch, bend))?;
        for &key in &keys {
            self.out.write(&message::note_on(ch, key, velocity))?;
        }
        self.held.entry(ch).or_default().extend(keys);
        Ok(())
    }

    fn note_off(&mut self, target: SinkTarget, pitches: &[f32]) -> Result<(), SinkError> {
        let ch = target.channel;
        for &pitch in pitches {
            let (key, _) = message::split_pitch(pitch);
            self.out.write(&message::note_off(ch, key))?;
            if let Some(held) = self.held.get_mut(&ch) {
                if let Some(pos) = held.iter().position(|&k| k == key) {
                    held.remove(pos);
                }
            }
        }
        Ok(())
    }

    fn glide(&mut self, target: SinkTarget, pitches: &[f32]) -> Result<(), SinkError> {
        let ch = target.channel;
        let (Some(&reference), Some(&pitch)) =
            (self.held.get(&ch).and_then(|h| h.first()), pitches.first())
        else {
            return Ok(());
        };
        self.out
            .write(&message::pitch_bend(ch, pitch - reference as f32))
    }

    fn silence(&mut self, target: SinkTarget) -> Result<(), SinkError> {
        self.held.remove(&target.channel);
        self.out.write(&message::all_sound_off(target.channel))
    }

    fn set_articulation(&mut self, target: SinkTarget, articulations: &[Articulation]) -> Result<(), SinkError> {
        let program = articulations
            .first()
            .map(|&a| message::articulation_program(a))
            .unwrap_or(0);
        self.out
            .write(&message::program_change(target.channel, program))
    }

    fn clock_pulse(&mut self) -> Result<(), SinkError> {
        self.out.write(&[message::CLOCK])
    }

    fn transport(&mut self, signal: TransportSignal) -> Result<(), SinkError> {
        let byte = match signal {
            TransportSignal::Start => message::START,
            TransportSignal::Stop => message::STOP,
        };
        self.out.write(&[byte])
    }
}
