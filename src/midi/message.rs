//! Raw MIDI message encoding.

use crate::score::event::Articulation;

pub const CLOCK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const STOP: u8 = 0xFC;

/// Semitones covered by a full pitch-bend deflection in either direction.
pub const BEND_RANGE: f32 = 2.0;

const BEND_CENTER: u16 = 8192;

pub fn note_on(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
}

pub fn note_off(channel: u8, note: u8) -> [u8; 3] {
    [0x80 | (channel & 0x0F), note & 0x7F, 0]
}

pub fn program_change(channel: u8, program: u8) -> [u8; 2] {
    [0xC0 | (channel & 0x0F), program & 0x7F]
}

pub fn control_change(channel: u8, controller: u8, value: u8) -> [u8; 3] {
    [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]
}

/// CC 120, all sound off.
pub fn all_sound_off(channel: u8) -> [u8; 3] {
    control_change(channel, 120, 0)
}

/// Pitch bend by `semitones`, clamped to [`BEND_RANGE`].
pub fn pitch_bend(channel: u8, semitones: f32) -> [u8; 3] {
    let amount = (semitones / BEND_RANGE).clamp(-1.0, 1.0);
    let value = (BEND_CENTER as f32 + amount * 8191.0).round() as u16;
    [
        0xE0 | (channel & 0x0F),
        (value & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
    ]
}

/// Split a possibly fractional pitch into a key number and a bend offset.
pub fn split_pitch(pitch: f32) -> (u8, f32) {
    let key = pitch.floor().clamp(0.0, 127.0);
    (key as u8, pitch - key)
}

/// Program number used to announce an articulation.
pub fn articulation_program(articulation: Articulation) -> u8 {
    articulation.code()
}
