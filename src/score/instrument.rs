//! Instruments: per-bar compiled events plus routing and performance state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::event::{BarEvents, Dynamic};
use crate::dsl::error::ParseError;

/// Where an instrument's events are sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Route {
    #[default]
    None,
    Midi {
        port: usize,
        channel: u8,
    },
    /// A named remote display client.
    Remote(String),
    /// An external synthesis engine, by handle.
    Engine(u32),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::None => f.write_str("none"),
            Route::Midi { port, channel } => write!(f, "midi {port}:{}", channel + 1),
            Route::Remote(client) => write!(f, "client {client}"),
            Route::Engine(handle) => write!(f, "engine {handle}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Clef {
    #[default]
    Treble,
    Bass,
    Alto,
    Tenor,
    Percussion,
}

impl Clef {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "treble" => Some(Clef::Treble),
            "bass" => Some(Clef::Bass),
            "alto" => Some(Clef::Alto),
            "tenor" => Some(Clef::Tenor),
            "percussion" => Some(Clef::Percussion),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Clef::Treble => "treble",
            Clef::Bass => "bass",
            Clef::Alto => "alto",
            Clef::Tenor => "tenor",
            Clef::Percussion => "percussion",
        }
    }

    /// Code sent to display clients.
    pub fn code(self) -> i32 {
        match self {
            Clef::Treble => 0,
            Clef::Bass => 1,
            Clef::Alto => 2,
            Clef::Tenor => 3,
            Clef::Percussion => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub id: usize,
    pub name: String,
    pub transpose: i32,
    pub rhythm_only: bool,
    pub clef: Clef,
    pub route: Route,
    /// Extra latency applied to everything sent for this instrument.
    pub delay_ms: u32,
    pub muted: bool,
    pub solo: bool,
    /// Compiled events per bar index.
    pub bars: HashMap<usize, Arc<BarEvents>>,
    /// Dynamic the next compiled bar starts from.
    pub last_dynamic: f32,
    /// A slur is still open at the end of the last compiled bar.
    pub slur_open: bool,
}

impl Instrument {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            transpose: 0,
            rhythm_only: false,
            clef: Clef::default(),
            route: Route::None,
            delay_ms: 0,
            muted: false,
            solo: false,
            bars: HashMap::new(),
            last_dynamic: Dynamic::MEZZO_FORTE.level(),
            slur_open: false,
        }
    }

    pub fn events(&self, bar: usize) -> Option<&Arc<BarEvents>> {
        self.bars.get(&bar)
    }

    /// Set the MIDI channel from a 1-based value.
    pub fn set_midi_channel(&mut self, channel: u32) -> Result<(), ParseError> {
        if !(1..=16).contains(&channel) {
            return Err(ParseError::command(format!(
                "MIDI channel {channel} out of range 1-16"
            )));
        }
        let port = match self.route {
            Route::Midi { port, .. } => port,
            _ => 0,
        };
        self.route = Route::Midi {
            port,
            channel: (channel - 1) as u8,
        };
        Ok(())
    }

    pub fn set_midi_port(&mut self, port: usize) {
        let channel = match self.route {
            Route::Midi { channel, .. } => channel,
            _ => 0,
        };
        self.route = Route::Midi { port, channel };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_routing_keeps_the_other_half() {
        let mut inst = Instrument::new(0, "vln");
        inst.set_midi_port(2);
        inst.set_midi_channel(10).unwrap();
        assert_eq!(inst.route, Route::Midi { port: 2, channel: 9 });
        inst.set_midi_port(1);
        assert_eq!(inst.route, Route::Midi { port: 1, channel: 9 });
        assert!(inst.set_midi_channel(17).is_err());
        assert!(inst.set_midi_channel(0).is_err());
    }

    #[test]
    fn clef_names() {
        assert_eq!(Clef::parse("bass"), Some(Clef::Bass));
        assert_eq!(Clef::Bass.name(), "bass");
        assert!(Clef::parse("soprano").is_none());
    }

    #[test]
    fn new_instruments_start_at_mezzo_forte() {
        let inst = Instrument::new(3, "vla");
        assert_eq!(inst.last_dynamic, Dynamic::MEZZO_FORTE.level());
        assert_eq!(inst.route.to_string(), "none");
    }
}
