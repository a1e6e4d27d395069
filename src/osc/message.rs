//! OSC address mapping for notifications and per-instrument events.

use rosc::{OscMessage, OscType};

use crate::sink::Notification;

fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

fn int(v: usize) -> OscType {
    OscType::Int(v.min(i32::MAX as usize) as i32)
}

/// The message a display client receives for a notification.
pub fn notification_message(n: &Notification) -> OscMessage {
    match n {
        Notification::Bar { index, name } => {
            msg("/bar", vec![int(*index), OscType::String(name.clone())])
        }
        Notification::LoopIndex {
            loop_index,
            position,
        } => msg("/loopndx", vec![int(*position), int(*loop_index)]),
        Notification::Beat { beat, beats } => {
            msg("/beat", vec![int(*beat as usize), int(*beats as usize)])
        }
        Notification::BeatInfo { ms, num, den } => msg(
            "/beatinfo",
            vec![
                OscType::Float(*ms as f32),
                int(*num as usize),
                int(*den as usize),
            ],
        ),
        Notification::Countdown(n) => msg("/countdown", vec![int(*n as usize)]),
        Notification::Finished => msg("/finish", Vec::new()),
        Notification::Line {
            instrument,
            name,
            bar,
            text,
        } => msg(
            "/line",
            vec![
                int(*instrument),
                OscType::String(name.clone()),
                int(*bar),
                OscType::String(text.clone()),
            ],
        ),
        Notification::Sequence { instrument, step } => {
            msg("/seq", vec![int(*instrument), int(*step)])
        }
        Notification::MeterChanged { num, den } => {
            msg("/time", vec![int(*num as usize), int(*den as usize)])
        }
        Notification::TempoChanged { bpm } => msg("/tempo", vec![OscType::Float(*bpm as f32)]),
        Notification::GroupChanged { name, members } => {
            let mut args = vec![OscType::String(name.clone())];
            args.extend(members.iter().cloned().map(OscType::String));
            msg("/group", args)
        }
        Notification::Clef { instrument, clef } => {
            msg("/clef", vec![int(*instrument), OscType::Int(*clef)])
        }
    }
}

pub fn note_message(instrument: usize, pitches: &[f32], velocity: u8) -> OscMessage {
    let mut args = vec![int(instrument)];
    args.extend(pitches.iter().map(|&p| OscType::Float(p)));
    args.push(int(velocity as usize));
    msg("/note", args)
}

pub fn dynamic_message(instrument: usize, level: f32) -> OscMessage {
    msg("/dynamic", vec![int(instrument), OscType::Float(level)])
}

pub fn articulation_message(instrument: usize, codes: &[u8]) -> OscMessage {
    let mut args = vec![int(instrument)];
    args.extend(codes.iter().map(|&c| int(c as usize)));
    msg("/articulation", args)
}

pub fn text_message(instrument: usize, text: &str) -> OscMessage {
    msg("/text", vec![int(instrument), OscType::String(text.to_string())])
}

pub fn rest_message(instrument: usize) -> OscMessage {
    msg("/rest", vec![int(instrument)])
}

/// A user-typed message: numbers become ints or floats, the rest strings.
pub fn raw_message(addr: &str, args: &[String]) -> OscMessage {
    let args = args
        .iter()
        .map(|a| {
            if let Ok(i) = a.parse::<i32>() {
                OscType::Int(i)
            } else if let Ok(f) = a.parse::<f32>() {
                OscType::Float(f)
            } else {
                OscType::String(a.trim_matches('"').to_string())
            }
        })
        .collect();
    msg(addr, args)
}
