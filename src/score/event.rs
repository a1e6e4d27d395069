//! Compiled event data for one instrument in one bar.
//!
//! A [`BarEvents`] is what the melodic line compiler produces and what the
//! scheduler walks. It is immutable once the owning bar is closed.

use crate::dsl::duration::{NoteValue, TupletRatio, MINDUR};
use crate::dsl::note::Pitch;

/// Articulation marks written as `-x` after a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Articulation {
    Staccato,
    Accent,
    Marcato,
    Portato,
    Tenuto,
    Staccatissimo,
}

impl Articulation {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Articulation::Staccato),
            '>' => Some(Articulation::Accent),
            '^' => Some(Articulation::Marcato),
            '_' => Some(Articulation::Portato),
            '-' => Some(Articulation::Tenuto),
            '!' => Some(Articulation::Staccatissimo),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Articulation::Staccato => '.',
            Articulation::Accent => '>',
            Articulation::Marcato => '^',
            Articulation::Portato => '_',
            Articulation::Tenuto => '-',
            Articulation::Staccatissimo => '!',
        }
    }

    /// Code used on the wire (MIDI program change, OSC argument).
    pub fn code(self) -> u8 {
        match self {
            Articulation::Staccato => 1,
            Articulation::Accent => 2,
            Articulation::Marcato => 3,
            Articulation::Portato => 4,
            Articulation::Tenuto => 5,
            Articulation::Staccatissimo => 6,
        }
    }
}

const DYNAMIC_NAMES: [&str; 10] = ["pppp", "ppp", "pp", "p", "mp", "mf", "f", "ff", "fff", "ffff"];

/// A dynamic mark, `\pppp` through `\ffff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dynamic(u8);

impl Dynamic {
    pub const MEZZO_FORTE: Dynamic = Dynamic(5);

    pub fn parse(name: &str) -> Option<Self> {
        DYNAMIC_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| Dynamic(i as u8))
    }

    pub fn name(self) -> &'static str {
        DYNAMIC_NAMES[self.0 as usize]
    }

    /// Amplitude in (0, 1].
    pub fn level(self) -> f32 {
        (self.0 as f32 + 1.0) / DYNAMIC_NAMES.len() as f32
    }

    /// Whether `name` is a dynamic mark (reserved, cannot name a symbol).
    pub fn is_dynamic_name(name: &str) -> bool {
        Self::parse(name).is_some()
    }
}

/// Level change applied between two dynamic marks by a ramp.
pub const RAMP_STEP: f32 = 0.1;

/// Hairpins: `\<`, `\>` and the terminating `\!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ramp {
    Crescendo,
    Diminuendo,
    End,
}

impl Ramp {
    pub fn symbol(self) -> char {
        match self {
            Ramp::Crescendo => '<',
            Ramp::Diminuendo => '>',
            Ramp::End => '!',
        }
    }
}

/// Text written above (`^"..."`) or below (`_"..."`) a note.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextMark {
    pub above: bool,
    pub text: String,
}

/// One event (note, chord or rest) of an instrument within a bar.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    /// Written pitches; empty for rests.
    pub pitches: Vec<Pitch>,
    /// Sounding MIDI pitches after transposition, ottava and cluster fill.
    pub midi: Vec<f32>,
    pub rest: bool,
    /// Position in the bar, in ticks.
    pub onset: u32,
    /// Length in ticks after tuplet correction.
    pub duration: u32,
    pub value: NoteValue,
    pub tuplet: Option<TupletRatio>,
    /// Amplitude in 0–1 after ramps are resolved.
    pub dynamic: f32,
    pub velocity: u8,
    pub dynamic_mark: Option<Dynamic>,
    pub ramp: Option<Ramp>,
    pub articulations: Vec<Articulation>,
    pub tie: bool,
    pub slur_start: bool,
    pub slur_end: bool,
    /// Played legato from the previous event.
    pub slurred: bool,
    pub gliss: bool,
    pub texts: Vec<TextMark>,
    pub ottava: i8,
    pub cluster: bool,
    /// Pitch is implicit (rhythm staff).
    pub rhythm_only: bool,
}

impl StepEvent {
    /// A rest of `value`, lasting `duration` ticks at `onset`.
    pub fn rest(onset: u32, value: NoteValue, duration: u32, dynamic: f32) -> Self {
        Self {
            pitches: Vec::new(),
            midi: Vec::new(),
            rest: true,
            onset,
            duration,
            value,
            tuplet: None,
            dynamic,
            velocity: velocity_for(dynamic),
            dynamic_mark: None,
            ramp: None,
            articulations: Vec::new(),
            tie: false,
            slur_start: false,
            slur_end: false,
            slurred: false,
            gliss: false,
            texts: Vec::new(),
            ottava: 0,
            cluster: false,
            rhythm_only: false,
        }
    }

    /// Canonical source spelling of this event.
    pub fn to_source(&self) -> String {
        let mut s = String::new();
        if self.rest {
            s.push('r');
        } else if self.rhythm_only {
            // pitch is implicit
        } else if self.pitches.len() == 1 && !self.cluster {
            s.push_str(&self.pitches[0].to_source());
        } else {
            s.push('<');
            let names: Vec<String> = self.pitches.iter().map(Pitch::to_source).collect();
            s.push_str(&names.join(" "));
            s.push('>');
        }
        s.push_str(&self.value.to_source());
        if let Some(ratio) = self.tuplet {
            s.push_str(&format!("/{}/{}", ratio.num, ratio.den));
        }
        if self.ottava != 0 {
            s.push_str(&format!("o{}", self.ottava));
        }
        if self.cluster {
            s.push('@');
        }
        for art in &self.articulations {
            s.push('-');
            s.push(art.symbol());
        }
        if let Some(mark) = self.dynamic_mark {
            s.push('\\');
            s.push_str(mark.name());
        }
        if let Some(ramp) = self.ramp {
            s.push('\\');
            s.push(ramp.symbol());
        }
        if self.slur_end {
            s.push(')');
        }
        if self.slur_start {
            s.push('(');
        }
        if self.tie {
            s.push('~');
        }
        if self.gliss {
            s.push_str("\\gliss");
        }
        for text in &self.texts {
            s.push(if text.above { '^' } else { '_' });
            s.push('"');
            s.push_str(&text.text);
            s.push('"');
        }
        s
    }

    /// Whether this event carries a connection into the following event.
    pub fn links_forward(&self) -> bool {
        !self.rest && (self.tie || self.gliss)
    }
}

/// MIDI velocity for an amplitude in 0–1.
pub fn velocity_for(level: f32) -> u8 {
    (level.clamp(0.0, 1.0) * 127.0).round().max(1.0) as u8
}

/// The compiled events of one instrument in one bar.
#[derive(Debug, Clone, PartialEq)]
pub struct BarEvents {
    pub steps: Vec<StepEvent>,
    /// Total length in ticks.
    pub ticks: u32,
    /// A tie, slur or glissando continues into the next bar.
    pub link_forward: bool,
    /// The first event continues a tie, slur or glissando from the previous bar.
    pub link_backward: bool,
    /// Slur still open when the bar ends.
    pub slur_open: bool,
    /// Dynamic level the instrument's next bar starts from.
    pub end_dynamic: f32,
}

impl BarEvents {
    /// A bar of rests spanning `ticks`, split greedily into writable values.
    pub fn rest(ticks: u32, dynamic: f32) -> Self {
        let mut steps = Vec::new();
        let mut onset = 0;
        let mut remaining = ticks;
        while remaining > 0 {
            let value = greedy_value(remaining);
            let len = value.ticks();
            steps.push(StepEvent::rest(onset, value, len, dynamic));
            onset += len;
            remaining -= len;
        }
        Self {
            steps,
            ticks,
            link_forward: false,
            link_backward: false,
            slur_open: false,
            end_dynamic: dynamic,
        }
    }

    /// Canonical source tokens; recompiling them yields the same events.
    pub fn to_source(&self) -> String {
        let tokens: Vec<String> = self.steps.iter().map(StepEvent::to_source).collect();
        tokens.join(" ")
    }

    pub fn is_silent(&self) -> bool {
        self.steps.iter().all(|s| s.rest)
    }

    /// Index of the step sounding at `tick`.
    pub fn step_at(&self, tick: u32) -> Option<usize> {
        self.steps
            .iter()
            .rposition(|s| s.onset <= tick)
            .filter(|&i| tick < self.steps[i].onset + self.steps[i].duration)
    }

    /// Index of the step starting exactly at `tick`.
    pub fn step_starting_at(&self, tick: u32) -> Option<usize> {
        self.steps.iter().position(|s| s.onset == tick)
    }
}

fn greedy_value(ticks: u32) -> NoteValue {
    for value in [1u32, 2, 4, 8, 16, 32, 64] {
        let base = MINDUR / value;
        if base <= ticks {
            return NoteValue { value, dots: 0 };
        }
    }
    NoteValue { value: 64, dots: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_levels_increase() {
        let p = Dynamic::parse("p").unwrap();
        let f = Dynamic::parse("f").unwrap();
        assert!(f.level() > p.level());
        assert_eq!(Dynamic::parse("ffff").unwrap().level(), 1.0);
        assert!(Dynamic::parse("fp").is_none());
    }

    #[test]
    fn velocity_mapping() {
        assert_eq!(velocity_for(1.0), 127);
        assert_eq!(velocity_for(0.0), 1);
        assert_eq!(velocity_for(0.5), 64);
    }

    #[test]
    fn full_bar_rest_in_four_four() {
        let bar = BarEvents::rest(256, 0.6);
        assert_eq!(bar.steps.len(), 1);
        assert_eq!(bar.to_source(), "r1");
        assert!(bar.is_silent());
    }

    #[test]
    fn full_bar_rest_in_odd_meter() {
        let bar = BarEvents::rest(80, 0.6);
        let total: u32 = bar.steps.iter().map(|s| s.duration).sum();
        assert_eq!(total, 80);
        assert_eq!(bar.to_source(), "r4 r16");
    }

    #[test]
    fn step_lookup() {
        let bar = BarEvents::rest(192, 0.6);
        assert_eq!(bar.step_at(0), Some(0));
        assert_eq!(bar.step_at(150), Some(1));
        assert_eq!(bar.step_at(192), None);
        assert_eq!(bar.step_starting_at(128), Some(1));
        assert_eq!(bar.step_starting_at(100), None);
    }

    #[test]
    fn articulation_codes_round_trip() {
        for c in ['.', '>', '^', '_', '-', '!'] {
            let art = Articulation::from_char(c).unwrap();
            assert_eq!(art.symbol(), c);
        }
        assert!(Articulation::from_char('x').is_none());
    }
}
