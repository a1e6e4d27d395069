//! Pitch names: converts `c`, `cis'`, `bes,,`, `eeh''` to MIDI pitches.
//!
//! Letters map to the octave below middle C (`c` = MIDI 48). Accidental
//! suffixes `is`/`es` raise or lower by a semitone, `ih`/`eh` by a quarter
//! tone, and may be repeated. `'` raises an octave, `,` lowers one.

use super::error::ParseError;

/// MIDI value of the letter `c` without octave marks.
pub const BASE_MIDI: f32 = 48.0;

const SEMITONES: [f32; 7] = [0.0, 2.0, 4.0, 5.0, 7.0, 9.0, 11.0];
const LETTERS: [char; 7] = ['c', 'd', 'e', 'f', 'g', 'a', 'b'];

/// An accidental as written or as displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Accidental {
    #[default]
    None,
    Natural,
    QuarterSharp,
    Sharp,
    ThreeQuarterSharp,
    DoubleSharp,
    QuarterFlat,
    Flat,
    ThreeQuarterFlat,
    DoubleFlat,
}

impl Accidental {
    /// Accidental for an alteration in semitones; `None` for zero.
    fn from_alteration(alteration: f32) -> Option<Self> {
        let quarters = (alteration * 2.0).round() as i32;
        match quarters {
            0 => Some(Accidental::None),
            1 => Some(Accidental::QuarterSharp),
            2 => Some(Accidental::Sharp),
            3 => Some(Accidental::ThreeQuarterSharp),
            4 => Some(Accidental::DoubleSharp),
            -1 => Some(Accidental::QuarterFlat),
            -2 => Some(Accidental::Flat),
            -3 => Some(Accidental::ThreeQuarterFlat),
            -4 => Some(Accidental::DoubleFlat),
            _ => None,
        }
    }

    /// Whether this is an alteration (not none, not natural).
    pub fn is_altered(self) -> bool {
        !matches!(self, Accidental::None | Accidental::Natural)
    }

    /// Numeric code sent to display clients.
    pub fn code(self) -> i32 {
        match self {
            Accidental::None => -1,
            Accidental::Natural => 0,
            Accidental::QuarterSharp => 1,
            Accidental::Sharp => 2,
            Accidental::ThreeQuarterSharp => 3,
            Accidental::DoubleSharp => 4,
            Accidental::QuarterFlat => 5,
            Accidental::Flat => 6,
            Accidental::ThreeQuarterFlat => 7,
            Accidental::DoubleFlat => 8,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Accidental::None | Accidental::Natural => "",
            Accidental::QuarterSharp => "ih",
            Accidental::Sharp => "is",
            Accidental::ThreeQuarterSharp => "isih",
            Accidental::DoubleSharp => "isis",
            Accidental::QuarterFlat => "eh",
            Accidental::Flat => "es",
            Accidental::ThreeQuarterFlat => "eseh",
            Accidental::DoubleFlat => "eses",
        }
    }
}

/// A written pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct Pitch {
    /// Scale degree, 0 = c … 6 = b.
    pub degree: u8,
    /// Alteration in semitones (quarter tones allowed).
    pub alteration: f32,
    /// Octave relative to the letter's base octave (`'` = +1, `,` = −1).
    pub octave: i8,
    /// Accidental as written.
    pub accidental: Accidental,
    /// Accidental to display once natural-sign correction has run.
    pub shown: Accidental,
}

impl Pitch {
    pub fn letter(&self) -> char {
        LETTERS[self.degree as usize]
    }

    /// MIDI pitch before transposition.
    pub fn midi(&self) -> f32 {
        BASE_MIDI + SEMITONES[self.degree as usize] + self.alteration + 12.0 * self.octave as f32
    }

    /// Canonical LilyPond spelling of this pitch.
    pub fn to_source(&self) -> String {
        let mut s = String::new();
        s.push(self.letter());
        s.push_str(self.accidental.suffix());
        let mark = if self.octave > 0 { '\'' } else { ',' };
        for _ in 0..self.octave.unsigned_abs() {
            s.push(mark);
        }
        s
    }
}

/// Parse a pitch at the start of `token`.
///
/// Returns `Ok(None)` when the token does not start with a pitch letter,
/// otherwise the pitch and the number of bytes it occupied.
pub fn parse_pitch_prefix(token: &str) -> Result<Option<(Pitch, usize)>, ParseError> {
    let bytes = token.as_bytes();
    let Some(&first) = bytes.first() else {
        return Ok(None);
    };
    let Some(degree) = LETTERS.iter().position(|&c| c as u8 == first) else {
        return Ok(None);
    };

    let mut i = 1;
    while i < bytes.len() && matches!(bytes[i], b'i' | b'e' | b's' | b'h') {
        i += 1;
    }
    let mut suffix = &token[1..i];
    let mut alteration = 0.0f32;

    // LilyPond shorthand: "es"/"as" for e-flat/a-flat
    if (first == b'e' || first == b'a') && suffix.starts_with('s') {
        alteration -= 1.0;
        suffix = &suffix[1..];
    }
    while !suffix.is_empty() {
        let step = match suffix.get(..2) {
            Some("is") => 1.0,
            Some("es") => -1.0,
            Some("ih") => 0.5,
            Some("eh") => -0.5,
            _ => {
                return Err(ParseError::melody(format!(
                    "malformed accidental in '{token}'"
                )))
            }
        };
        alteration += step;
        suffix = &suffix[2..];
    }
    let accidental = Accidental::from_alteration(alteration)
        .ok_or_else(|| ParseError::melody(format!("accidental out of range in '{token}'")))?;

    let mut octave: i32 = 0;
    let mut up = false;
    let mut down = false;
    while i < bytes.len() && matches!(bytes[i], b'\'' | b',') {
        if bytes[i] == b'\'' {
            up = true;
            octave += 1;
        } else {
            down = true;
            octave -= 1;
        }
        i += 1;
    }
    if up && down {
        return Err(ParseError::melody(format!(
            "mixed octave marks in '{token}'"
        )));
    }
    if !(-4..=5).contains(&octave) {
        return Err(ParseError::melody(format!("octave out of range in '{token}'")));
    }

    let pitch = Pitch {
        degree: degree as u8,
        alteration,
        octave: octave as i8,
        accidental,
        shown: accidental,
    };
    Ok(Some((pitch, i)))
}

/// Parse a complete pitch name such as `cis'`.
pub fn parse_pitch(name: &str) -> Result<Pitch, ParseError> {
    match parse_pitch_prefix(name)? {
        Some((pitch, len)) if len == name.len() => Ok(pitch),
        _ => Err(ParseError::melody(format!("invalid pitch '{name}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn midi(name: &str) -> f32 {
        parse_pitch(name).unwrap().midi()
    }

    #[test]
    fn middle_c() {
        assert_approx_eq!(midi("c'"), 60.0);
    }

    #[test]
    fn bare_letters_sit_below_middle_c() {
        assert_approx_eq!(midi("c"), 48.0);
        assert_approx_eq!(midi("b"), 59.0);
    }

    #[test]
    fn octave_marks() {
        assert_approx_eq!(midi("c''"), 72.0);
        assert_approx_eq!(midi("c,"), 36.0);
        assert_approx_eq!(midi("a'"), 69.0);
    }

    #[test]
    fn sharps_and_flats() {
        assert_approx_eq!(midi("cis'"), 61.0);
        assert_approx_eq!(midi("bes"), 58.0);
        assert_approx_eq!(midi("fisis'"), 67.0);
    }

    #[test]
    fn flat_shorthands() {
        assert_approx_eq!(midi("es'"), 63.0);
        assert_approx_eq!(midi("ees'"), 63.0);
        assert_approx_eq!(midi("as"), 56.0);
        assert_approx_eq!(midi("ases"), 55.0);
    }

    #[test]
    fn quarter_tones() {
        assert_approx_eq!(midi("cih'"), 60.5);
        assert_approx_eq!(midi("beh"), 58.5);
        assert_eq!(
            parse_pitch("cisih'").unwrap().accidental,
            Accidental::ThreeQuarterSharp
        );
    }

    #[test]
    fn prefix_reports_length() {
        let (pitch, len) = parse_pitch_prefix("fis''8.").unwrap().unwrap();
        assert_eq!(len, 5);
        assert_eq!(pitch.accidental, Accidental::Sharp);
        assert_eq!(pitch.octave, 2);
    }

    #[test]
    fn non_pitch_prefix() {
        assert!(parse_pitch_prefix("r4").unwrap().is_none());
        assert!(parse_pitch_prefix("4").unwrap().is_none());
    }

    #[test]
    fn malformed_accidental() {
        assert!(parse_pitch_prefix("cix4").is_err());
        assert!(parse_pitch("cish").is_err());
        assert!(parse_pitch("cisisis").is_err());
    }

    #[test]
    fn mixed_octave_marks_rejected() {
        assert!(parse_pitch("c',").is_err());
    }

    #[test]
    fn source_round_trip() {
        for name in ["c'", "cis''", "ees", "bes,", "fisis", "geh'"] {
            let pitch = parse_pitch(name).unwrap();
            let again = parse_pitch(&pitch.to_source()).unwrap();
            assert_eq!(pitch, again, "{name}");
        }
    }
}
