//! Rhythmic values in integer ticks.
//!
//! A whole note lasts [`MINDUR`] ticks, so the shortest value (a 64th) is 4
//! ticks and every dot allowed on it still lands on a whole tick. Tuplets are
//! the only source of fractional durations; they are resolved by cumulative
//! rounding so a group always sums to its exact length.

use super::error::ParseError;

/// Ticks in a whole note.
pub const MINDUR: u32 = 256;

/// The note values that may be written.
pub const NOTE_VALUES: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

/// A written note value with augmentation dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteValue {
    pub value: u32,
    pub dots: u8,
}

impl NoteValue {
    pub fn new(value: u32, dots: u8) -> Result<Self, ParseError> {
        if !NOTE_VALUES.contains(&value) {
            return Err(ParseError::duration(format!(
                "duration {value} is not one of 1, 2, 4, 8, 16, 32, 64"
            )));
        }
        let nv = Self { value, dots };
        nv.try_ticks()?;
        Ok(nv)
    }

    fn try_ticks(&self) -> Result<u32, ParseError> {
        let base = MINDUR / self.value;
        let mut total = base;
        let mut add = base;
        for _ in 0..self.dots {
            if add % 2 != 0 {
                return Err(ParseError::duration(format!(
                    "too many dots on duration {}",
                    self.value
                )));
            }
            add /= 2;
            total += add;
        }
        Ok(total)
    }

    /// Length in ticks. Valid by construction.
    pub fn ticks(&self) -> u32 {
        self.try_ticks().unwrap_or(0)
    }

    pub fn to_source(&self) -> String {
        let mut s = self.value.to_string();
        for _ in 0..self.dots {
            s.push('.');
        }
        s
    }
}

impl Default for NoteValue {
    fn default() -> Self {
        Self { value: 4, dots: 0 }
    }
}

/// Parse a duration (digits followed by dots) at the start of `s`.
///
/// Returns `Ok(None)` if `s` does not start with a digit.
pub fn parse_value_prefix(s: &str) -> Result<Option<(NoteValue, usize)>, ParseError> {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Ok(None);
    }
    let value: u32 = s[..digits]
        .parse()
        .map_err(|_| ParseError::duration(format!("invalid duration in '{s}'")))?;
    let dots = s[digits..].bytes().take_while(|&b| b == b'.').count();
    let nv = NoteValue::new(value, dots.min(u8::MAX as usize) as u8)?;
    Ok(Some((nv, digits + dots)))
}

/// A tuplet ratio: `num` notes in the time of `den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupletRatio {
    pub num: u32,
    pub den: u32,
}

impl TupletRatio {
    /// Parse `n/d`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (n, d) = s
            .split_once('/')
            .ok_or_else(|| ParseError::duration(format!("tuplet ratio '{s}' must be n/d")))?;
        let num: u32 = n
            .parse()
            .map_err(|_| ParseError::duration(format!("invalid tuplet numerator '{n}'")))?;
        let den: u32 = d
            .parse()
            .map_err(|_| ParseError::duration(format!("invalid tuplet denominator '{d}'")))?;
        if num == 0 || den == 0 || num > 64 || den > 64 {
            return Err(ParseError::duration(format!(
                "tuplet ratio '{s}' out of range"
            )));
        }
        Ok(Self { num, den })
    }

    /// Exact, possibly fractional, scaled length of `ticks`.
    pub fn scale_exact(&self, ticks: u32) -> f64 {
        ticks as f64 * self.den as f64 / self.num as f64
    }
}

/// Scale a run of nominal durations by `ratio`, distributing the rounding
/// remainder so the sum equals `floor(sum(nominal) * den / num)`.
pub fn distribute_tuplet(nominal: &[u32], ratio: TupletRatio) -> Vec<u32> {
    let mut out = Vec::with_capacity(nominal.len());
    let mut cumulative: u64 = 0;
    let mut previous: u64 = 0;
    for &ticks in nominal {
        cumulative += ticks as u64;
        let scaled = cumulative * ratio.den as u64 / ratio.num as u64;
        out.push((scaled - previous) as u32);
        previous = scaled;
    }
    out
}

/// Ticks held by a bar in `num/den`.
pub fn bar_ticks(num: u32, den: u32) -> u32 {
    MINDUR * num / den
}
