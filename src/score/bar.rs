//! Bars: meter, tempo and link metadata.

use std::fmt;

use crate::dsl::duration::{bar_ticks, parse_value_prefix, NoteValue, MINDUR};
use crate::dsl::error::ParseError;

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Meter {
    pub num: u32,
    pub den: u32,
}

impl Meter {
    pub const COMMON: Meter = Meter { num: 4, den: 4 };

    /// Parse `n/d`. The denominator must be a writable note value.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (n, d) = s
            .split_once('/')
            .ok_or_else(|| ParseError::command(format!("meter '{s}' must be n/d")))?;
        let num: u32 = n
            .parse()
            .map_err(|_| ParseError::command(format!("invalid meter numerator '{n}'")))?;
        let den: u32 = d
            .parse()
            .map_err(|_| ParseError::command(format!("invalid meter denominator '{d}'")))?;
        if num == 0 || num > 64 {
            return Err(ParseError::command(format!("meter numerator {num} out of range")));
        }
        if !crate::dsl::duration::NOTE_VALUES.contains(&den) {
            return Err(ParseError::command(format!(
                "meter denominator {den} is not a note value"
            )));
        }
        Ok(Self { num, den })
    }

    /// Ticks in one bar of this meter.
    pub fn ticks(&self) -> u32 {
        bar_ticks(self.num, self.den)
    }

    /// Ticks in one beat (one denominator unit).
    pub fn beat_ticks(&self) -> u32 {
        MINDUR / self.den
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::COMMON
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Tempo as beats per minute of a beat unit (quarter by default).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub bpm: f64,
    pub unit: NoteValue,
}

impl Tempo {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            unit: NoteValue::default(),
        }
    }

    /// Parse `120` or `unit=bpm` such as `8=140` or `4.=60`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (unit, bpm) = match s.split_once('=') {
            Some((unit, bpm)) => {
                let (value, len) = parse_value_prefix(unit)?
                    .ok_or_else(|| ParseError::command(format!("invalid tempo unit '{unit}'")))?;
                if len != unit.len() {
                    return Err(ParseError::command(format!("invalid tempo unit '{unit}'")));
                }
                (value, bpm)
            }
            None => (NoteValue::default(), s),
        };
        let bpm: f64 = bpm
            .parse()
            .map_err(|_| ParseError::command(format!("invalid tempo '{bpm}'")))?;
        if !(1.0..=1000.0).contains(&bpm) {
            return Err(ParseError::command(format!("tempo {bpm} out of range")));
        }
        Ok(Self { bpm, unit })
    }

    /// Milliseconds per tick.
    pub fn ms_per_tick(&self) -> f64 {
        60_000.0 / self.bpm / self.unit.ticks() as f64
    }

    /// BPM expressed in quarter notes.
    pub fn quarter_bpm(&self) -> f64 {
        self.bpm * self.unit.ticks() as f64 / (MINDUR / 4) as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.unit.to_source(), self.bpm)
    }
}

/// One measure. Closed bars are immutable; instrument events live on the
/// instruments, keyed by the bar index.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub index: usize,
    pub name: String,
    pub meter: Meter,
    pub tempo: Tempo,
    /// Length in ticks; equals `meter.ticks()` except for the default bar.
    pub ticks: u32,
    /// A tie, slur or glissando carries into this bar.
    pub linked_to: Option<usize>,
    /// This bar continues a tie, slur or glissando from that bar.
    pub linked_from: Option<usize>,
}

impl Bar {
    pub fn new(index: usize, name: impl Into<String>, meter: Meter, tempo: Tempo) -> Self {
        Self {
            index,
            name: name.into(),
            meter,
            tempo,
            ticks: meter.ticks(),
            linked_to: None,
            linked_from: None,
        }
    }

    /// Beats in this bar, rounded up for lengths that are not whole beats.
    pub fn beats(&self) -> u32 {
        self.ticks.div_ceil(self.meter.beat_ticks())
    }
}
