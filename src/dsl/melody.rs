//! Melodic line compiler.
//!
//! Turns the tokens of one instrument's line within one bar into
//! [`BarEvents`]. The pipeline is: bracket validation, repetition expansion,
//! per-token parsing (pitch/chord/rest plus suffixes), tuplet correction,
//! tie/glissando validation, dynamic ramp resolution, natural-sign
//! correction and finally the duration-sum check against the bar.

use super::duration::{distribute_tuplet, parse_value_prefix, NoteValue, TupletRatio};
use super::error::ParseError;
use super::note::{parse_pitch, parse_pitch_prefix, Accidental, Pitch};
use crate::score::event::{
    velocity_for, Articulation, BarEvents, Dynamic, Ramp, StepEvent, TextMark, RAMP_STEP,
};

/// Upper bound on a single `*N` repetition.
const MAX_REPEAT: usize = 256;

/// Implicit pitch of rhythm staves (b').
const RHYTHM_PITCH: &str = "b'";

/// Everything the compiler needs to know about the instrument and bar.
#[derive(Debug, Clone)]
pub struct MelodyContext {
    /// Ticks the bar holds; `None` lets the line define the length.
    pub bar_ticks: Option<u32>,
    /// Transposition in semitones.
    pub transpose: i32,
    pub rhythm_only: bool,
    /// Amplitude the line starts from when it has no dynamic mark.
    pub start_dynamic: f32,
    /// Only correct accidentals against the same octave.
    pub same_octave_only: bool,
    /// A slur left open by the previous bar.
    pub slur_open: bool,
}

impl Default for MelodyContext {
    fn default() -> Self {
        Self {
            bar_ticks: Some(256),
            transpose: 0,
            rhythm_only: false,
            start_dynamic: Dynamic::MEZZO_FORTE.level(),
            same_octave_only: false,
            slur_open: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Head {
    Rest,
    Pitches(Vec<Pitch>),
    Implicit,
}

#[derive(Debug, Clone)]
struct ParsedToken {
    head: Head,
    value: Option<NoteValue>,
    tuplet: Option<TupletRatio>,
    ottava: i8,
    cluster: bool,
    articulations: Vec<Articulation>,
    dynamic_mark: Option<Dynamic>,
    ramp: Option<Ramp>,
    tie: bool,
    slur_start: bool,
    slur_end: bool,
    gliss: bool,
    texts: Vec<TextMark>,
}

impl ParsedToken {
    fn new(head: Head) -> Self {
        Self {
            head,
            value: None,
            tuplet: None,
            ottava: 0,
            cluster: false,
            articulations: Vec::new(),
            dynamic_mark: None,
            ramp: None,
            tie: false,
            slur_start: false,
            slur_end: false,
            gliss: false,
            texts: Vec::new(),
        }
    }
}

/// Compile one melodic line.
pub fn compile_line(tokens: &[String], ctx: &MelodyContext) -> Result<BarEvents, ParseError> {
    check_brackets(tokens)?;
    let flat = expand_repeats(tokens)?;

    let mut parsed = Vec::with_capacity(flat.len());
    for tok in flat.iter().filter(|t| t.as_str() != "|") {
        parsed.push(parse_token(tok, ctx)?);
    }
    if parsed.is_empty() {
        return Err(ParseError::melody("empty melodic line"));
    }

    let mut steps = build_steps(&parsed, ctx)?;
    validate_connections(&steps)?;
    let total: u32 = steps.iter().map(|s| s.duration).sum();
    let end_dynamic = resolve_dynamics(&mut steps, &parsed, ctx.start_dynamic, total);
    let slur_open = resolve_slurs(&mut steps, ctx.slur_open)?;
    correct_accidentals(&mut steps, ctx.same_octave_only);

    if let Some(expected) = ctx.bar_ticks {
        if total != expected {
            return Err(ParseError::duration(format!(
                "line lasts {total} ticks but the bar holds {expected}"
            )));
        }
    }

    let link_forward = slur_open || steps.last().is_some_and(StepEvent::links_forward);
    Ok(BarEvents {
        steps,
        ticks: total,
        link_forward,
        link_backward: false,
        slur_open,
        end_dynamic,
    })
}

/// Chord brackets must balance; `\<`, `\>` and `->` are not brackets.
fn check_brackets(tokens: &[String]) -> Result<(), ParseError> {
    for tok in tokens {
        let mut depth = 0i32;
        let mut in_text = false;
        let mut prev = '\0';
        for c in tok.chars() {
            if c == '"' {
                in_text = !in_text;
            } else if !in_text && prev != '\\' && prev != '-' {
                if c == '<' {
                    depth += 1;
                    if depth > 1 {
                        return Err(ParseError::melody(format!("nested chord in '{tok}'")));
                    }
                } else if c == '>' {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ParseError::melody(format!(
                            "chord closed before it was opened in '{tok}'"
                        )));
                    }
                }
            }
            prev = c;
        }
        if depth != 0 {
            return Err(ParseError::melody(format!("unclosed chord in '{tok}'")));
        }
        if in_text {
            return Err(ParseError::melody(format!("unclosed text in '{tok}'")));
        }
    }
    Ok(())
}

/// Split `*N` off the end of a token, ignoring asterisks inside text.
fn split_repeat(tok: &str) -> Result<(&str, Option<usize>), ParseError> {
    if tok.ends_with('"') {
        return Ok((tok, None));
    }
    let Some(star) = tok.rfind('*') else {
        return Ok((tok, None));
    };
    let count = &tok[star + 1..];
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::melody(format!("malformed repetition in '{tok}'")));
    }
    let n: usize = count
        .parse()
        .map_err(|_| ParseError::melody(format!("malformed repetition in '{tok}'")))?;
    if n == 0 || n > MAX_REPEAT {
        return Err(ParseError::melody(format!(
            "repetition count {n} out of range in '{tok}'"
        )));
    }
    Ok((&tok[..star], Some(n)))
}

#[derive(Debug, PartialEq)]
enum Piece {
    Open,
    Close(usize),
    Item(String),
}

/// Separate leading `[` and trailing `]`/`]*N` from tokens.
fn split_groups(tokens: &[String]) -> Result<Vec<Piece>, ParseError> {
    let mut pieces = Vec::new();
    for tok in tokens {
        let mut body = tok.as_str();
        while let Some(stripped) = body.strip_prefix('[') {
            pieces.push(Piece::Open);
            body = stripped;
        }
        let mut closes = Vec::new();
        loop {
            let (without, count) = split_repeat(body)?;
            if let Some(stripped) = without.strip_suffix(']') {
                closes.push(count.unwrap_or(1));
                body = stripped;
            } else {
                if !body.is_empty() {
                    let item = match count {
                        Some(n) => format!("{without}*{n}"),
                        None => without.to_string(),
                    };
                    pieces.push(Piece::Item(item));
                }
                break;
            }
        }
        pieces.extend(closes.into_iter().rev().map(Piece::Close));
    }
    Ok(pieces)
}

/// Expand `tok*N` and `[a b]*N` into a flat token list.
fn expand_repeats(tokens: &[String]) -> Result<Vec<String>, ParseError> {
    let pieces = split_groups(tokens)?;
    let mut stack: Vec<Vec<String>> = vec![Vec::new()];
    for piece in pieces {
        match piece {
            Piece::Open => stack.push(Vec::new()),
            Piece::Close(n) => {
                if stack.len() < 2 {
                    return Err(ParseError::melody("']' without matching '['"));
                }
                let group = stack.pop().unwrap_or_default();
                let outer = stack.last_mut().ok_or_else(|| ParseError::melody("unbalanced group"))?;
                for _ in 0..n {
                    outer.extend(group.iter().cloned());
                }
            }
            Piece::Item(item) => {
                let (body, count) = split_repeat(&item)?;
                let current = stack.last_mut().ok_or_else(|| ParseError::melody("unbalanced group"))?;
                for _ in 0..count.unwrap_or(1) {
                    current.push(body.to_string());
                }
            }
        }
    }
    if stack.len() != 1 {
        return Err(ParseError::melody("'[' without matching ']'"));
    }
    Ok(stack.pop().unwrap_or_default())
}

fn is_pitch_char(c: char) -> bool {
    matches!(c, 'a'..='g' | 'i' | 's' | 'h' | '\'' | ',')
}

fn parse_token(tok: &str, ctx: &MelodyContext) -> Result<ParsedToken, ParseError> {
    let (head, rest) = if let Some(inner_start) = tok.strip_prefix('<') {
        let close = inner_start
            .find('>')
            .ok_or_else(|| ParseError::melody(format!("unclosed chord in '{tok}'")))?;
        let inner = &inner_start[..close];
        let mut pitches = Vec::new();
        for name in inner.split_whitespace() {
            if let Some(bad) = name.chars().find(|&c| !is_pitch_char(c)) {
                return Err(ParseError::melody(format!(
                    "chord '{tok}' contains forbidden character '{bad}'"
                )));
            }
            pitches.push(parse_pitch(name)?);
        }
        if pitches.is_empty() {
            return Err(ParseError::melody(format!("empty chord '{tok}'")));
        }
        (Head::Pitches(pitches), &inner_start[close + 1..])
    } else if let Some(rest) = tok.strip_prefix('r') {
        (Head::Rest, rest)
    } else if let Some((pitch, len)) = parse_pitch_prefix(tok)? {
        (Head::Pitches(vec![pitch]), &tok[len..])
    } else if tok.starts_with(|c: char| c.is_ascii_digit()) {
        if !ctx.rhythm_only {
            return Err(ParseError::melody(format!(
                "'{tok}' has no pitch; bare durations need a rhythm staff"
            )));
        }
        (Head::Implicit, tok)
    } else {
        return Err(ParseError::melody(format!("unrecognised token '{tok}'")));
    };

    let mut parsed = ParsedToken::new(head);
    let mut rest = rest;
    if let Some((value, len)) = parse_value_prefix(rest)? {
        parsed.value = Some(value);
        rest = &rest[len..];
    }
    parse_suffix(tok, rest, &mut parsed)?;

    if matches!(parsed.head, Head::Rest) && (parsed.tie || parsed.gliss || parsed.cluster) {
        return Err(ParseError::melody(format!(
            "rest '{tok}' cannot carry a tie, glissando or cluster"
        )));
    }
    if parsed.cluster && !matches!(&parsed.head, Head::Pitches(p) if p.len() >= 2) {
        return Err(ParseError::melody(format!("cluster '{tok}' needs two pitches")));
    }
    Ok(parsed)
}

fn parse_suffix(tok: &str, suffix: &str, parsed: &mut ParsedToken) -> Result<(), ParseError> {
    let chars: Vec<char> = suffix.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '~' => {
                parsed.tie = true;
                i += 1;
            }
            '(' => {
                parsed.slur_start = true;
                i += 1;
            }
            ')' => {
                parsed.slur_end = true;
                i += 1;
            }
            '-' => {
                let art = chars
                    .get(i + 1)
                    .and_then(|&c| Articulation::from_char(c))
                    .ok_or_else(|| {
                        ParseError::melody(format!("malformed articulation in '{tok}'"))
                    })?;
                parsed.articulations.push(art);
                i += 2;
            }
            '\\' => {
                match chars.get(i + 1) {
                    Some('<') => parsed.ramp = Some(Ramp::Crescendo),
                    Some('>') => parsed.ramp = Some(Ramp::Diminuendo),
                    Some('!') => parsed.ramp = Some(Ramp::End),
                    _ => {
                        let word: String = chars[i + 1..]
                            .iter()
                            .take_while(|c| c.is_ascii_alphabetic())
                            .collect();
                        if word == "gliss" {
                            parsed.gliss = true;
                        } else if let Some(dynamic) = Dynamic::parse(&word) {
                            parsed.dynamic_mark = Some(dynamic);
                        } else {
                            return Err(ParseError::melody(format!(
                                "unknown marker '\\{word}' in '{tok}'"
                            )));
                        }
                        i += 1 + word.len();
                        continue;
                    }
                }
                i += 2;
            }
            c @ ('^' | '_') => {
                if chars.get(i + 1) != Some(&'"') {
                    return Err(ParseError::melody(format!(
                        "text after '{c}' must be quoted in '{tok}'"
                    )));
                }
                let close = chars[i + 2..]
                    .iter()
                    .position(|&c| c == '"')
                    .ok_or_else(|| ParseError::melody(format!("unclosed text in '{tok}'")))?;
                let text: String = chars[i + 2..i + 2 + close].iter().collect();
                parsed.texts.push(TextMark {
                    above: c == '^',
                    text,
                });
                i += close + 3;
            }
            '/' => {
                let num: String = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                let after_num = i + 1 + num.len();
                if chars.get(after_num) != Some(&'/') {
                    return Err(ParseError::melody(format!("malformed tuplet in '{tok}'")));
                }
                let den: String = chars[after_num + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                parsed.tuplet = Some(TupletRatio::parse(&format!("{num}/{den}"))?);
                i = after_num + 1 + den.len();
            }
            'o' => {
                let mut j = i + 1;
                let negative = chars.get(j) == Some(&'-');
                if negative {
                    j += 1;
                }
                let digits: String = chars[j..].iter().take_while(|c| c.is_ascii_digit()).collect();
                let amount: i8 = digits
                    .parse()
                    .map_err(|_| ParseError::melody(format!("malformed ottava in '{tok}'")))?;
                if amount > 3 {
                    return Err(ParseError::melody(format!("ottava out of range in '{tok}'")));
                }
                parsed.ottava = if negative { -amount } else { amount };
                i = j + digits.len();
            }
            '@' => {
                parsed.cluster = true;
                i += 1;
            }
            c => {
                return Err(ParseError::melody(format!(
                    "unexpected character '{c}' in '{tok}'"
                )));
            }
        }
    }
    Ok(())
}

fn build_steps(parsed: &[ParsedToken], ctx: &MelodyContext) -> Result<Vec<StepEvent>, ParseError> {
    let mut values = Vec::with_capacity(parsed.len());
    let mut last = NoteValue::default();
    for p in parsed {
        if let Some(v) = p.value {
            last = v;
        }
        values.push(last);
    }

    let nominal: Vec<u32> = values.iter().map(NoteValue::ticks).collect();
    let mut durations = nominal.clone();
    let mut i = 0;
    while i < parsed.len() {
        match parsed[i].tuplet {
            Some(ratio) => {
                let start = i;
                while i < parsed.len() && parsed[i].tuplet == Some(ratio) {
                    i += 1;
                }
                let scaled = distribute_tuplet(&nominal[start..i], ratio);
                durations[start..i].copy_from_slice(&scaled);
            }
            None => i += 1,
        }
    }

    let implicit = parse_pitch(RHYTHM_PITCH)?;
    let mut steps = Vec::with_capacity(parsed.len());
    let mut onset = 0u32;
    for ((p, value), duration) in parsed.iter().zip(values).zip(durations) {
        if duration == 0 {
            return Err(ParseError::duration(
                "tuplet shortens a note to less than one tick",
            ));
        }
        let mut step = StepEvent::rest(onset, value, duration, ctx.start_dynamic);
        step.tuplet = p.tuplet;
        step.ottava = p.ottava;
        step.cluster = p.cluster;
        step.articulations = p.articulations.clone();
        step.dynamic_mark = p.dynamic_mark;
        step.ramp = p.ramp;
        step.tie = p.tie;
        step.slur_start = p.slur_start;
        step.slur_end = p.slur_end;
        step.gliss = p.gliss;
        step.texts = p.texts.clone();
        match &p.head {
            Head::Rest => {}
            Head::Implicit => {
                step.rest = false;
                step.rhythm_only = true;
                step.midi = vec![implicit.midi()];
                step.pitches = vec![implicit.clone()];
            }
            Head::Pitches(pitches) => {
                step.rest = false;
                let shift = ctx.transpose as f32 + 12.0 * p.ottava as f32;
                let mut midi: Vec<f32> = pitches.iter().map(|pt| pt.midi() + shift).collect();
                if p.cluster {
                    let lo = midi.iter().copied().fold(f32::INFINITY, f32::min);
                    let hi = midi.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    midi.clear();
                    let mut m = lo;
                    while m <= hi {
                        midi.push(m);
                        m += 1.0;
                    }
                }
                if midi.iter().any(|&m| !(0.0..=127.0).contains(&m)) {
                    return Err(ParseError::melody(
                        "pitch outside the MIDI range after transposition",
                    ));
                }
                step.midi = midi;
                step.pitches = pitches.clone();
            }
        }
        onset += duration;
        steps.push(step);
    }
    Ok(steps)
}

/// Ties must join equal pitches; ties and glissandi cannot lead into rests.
fn validate_connections(steps: &[StepEvent]) -> Result<(), ParseError> {
    for pair in steps.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if (a.tie || a.gliss) && b.rest {
            return Err(ParseError::melody(format!(
                "'{}' connects into a rest",
                a.to_source()
            )));
        }
        if a.tie && a.midi != b.midi {
            return Err(ParseError::melody(format!(
                "tie between different pitches: '{}' and '{}'",
                a.to_source(),
                b.to_source()
            )));
        }
    }
    Ok(())
}

/// Assign an amplitude to every step, interpolating across hairpins.
/// Returns the level the line ends on.
fn resolve_dynamics(steps: &mut [StepEvent], parsed: &[ParsedToken], start: f32, total: u32) -> f32 {
    let n = steps.len();
    let mut level = start;
    let mut i = 0;
    while i < n {
        if let Some(mark) = parsed[i].dynamic_mark {
            level = mark.level();
        }
        steps[i].dynamic = level;
        let direction = match parsed[i].ramp {
            Some(Ramp::Crescendo) => 1.0,
            Some(Ramp::Diminuendo) => -1.0,
            _ => {
                i += 1;
                continue;
            }
        };

        let default_target = (level + direction * RAMP_STEP).clamp(RAMP_STEP, 1.0);
        let mut j = i + 1;
        let mut target = default_target;
        while j < n {
            if let Some(mark) = parsed[j].dynamic_mark {
                target = mark.level();
                break;
            }
            if parsed[j].ramp.is_some() {
                break;
            }
            j += 1;
        }
        let end_onset = if j < n { steps[j].onset } else { total };
        let ramp_start = steps[i].onset;
        let span = end_onset.saturating_sub(ramp_start).max(1) as f32;
        for step in steps.iter_mut().take(j).skip(i + 1) {
            let frac = (step.onset - ramp_start) as f32 / span;
            step.dynamic = level + (target - level) * frac;
        }
        // a following mark sets its own level when the loop reaches it
        if j >= n || parsed[j].dynamic_mark.is_none() {
            level = target;
        }
        i = j;
    }
    for step in steps.iter_mut() {
        step.velocity = velocity_for(step.dynamic);
    }
    level
}

/// Mark slurred steps. Returns whether a slur is still open at the end.
fn resolve_slurs(steps: &mut [StepEvent], open_at_start: bool) -> Result<bool, ParseError> {
    let mut open = open_at_start;
    for step in steps.iter_mut() {
        step.slurred = open && !step.rest;
        if step.slur_end {
            if !open {
                return Err(ParseError::melody(format!(
                    "slur closed on '{}' without being opened",
                    step.to_source()
                )));
            }
            open = false;
        }
        if step.slur_start {
            if open {
                return Err(ParseError::melody(format!(
                    "slur opened on '{}' while another is open",
                    step.to_source()
                )));
            }
            open = true;
        }
    }
    Ok(open)
}

/// Decide which accidentals to display. A plain note after an altered
/// occurrence of the same letter shows a natural sign.
fn correct_accidentals(steps: &mut [StepEvent], same_octave_only: bool) {
    let mut seen: Vec<(u8, i8, Accidental)> = Vec::new();
    for step in steps.iter_mut().filter(|s| !s.rest && !s.rhythm_only) {
        for pitch in step.pitches.iter_mut() {
            if pitch.accidental == Accidental::None {
                let previous = seen.iter().rev().find(|(degree, octave, _)| {
                    *degree == pitch.degree && (!same_octave_only || *octave == pitch.octave)
                });
                pitch.shown = match previous {
                    Some((_, _, acc)) if acc.is_altered() => Accidental::Natural,
                    _ => Accidental::None,
                };
            }
            seen.push((pitch.degree, pitch.octave, pitch.accidental));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn line(s: &str) -> Vec<String> {
        crate::dsl::token::tokenize(s).unwrap()
    }

    fn compile(s: &str) -> Result<BarEvents, ParseError> {
        compile_line(&line(s), &MelodyContext::default())
    }

    fn free(s: &str) -> BarEvents {
        let ctx = MelodyContext {
            bar_ticks: None,
            ..MelodyContext::default()
        };
        compile_line(&line(s), &ctx).unwrap()
    }

    #[test]
    fn four_quarters_fill_a_bar() {
        let bar = compile("c'4 d' e' f'").unwrap();
        assert_eq!(bar.steps.len(), 4);
        assert_eq!(bar.ticks, 256);
        let onsets: Vec<u32> = bar.steps.iter().map(|s| s.onset).collect();
        assert_eq!(onsets, vec![0, 64, 128, 192]);
        assert_approx_eq!(bar.steps[2].midi[0], 64.0);
    }

    #[test]
    fn duration_mismatch_is_an_error() {
        let err = compile("c'4 d' e'").unwrap_err();
        assert!(err.message.contains("192"));
        assert!(compile("c'2 d'2 e'4").is_err());
    }

    #[test]
    fn free_length_line() {
        let bar = free("c'8 d' e'4.");
        assert_eq!(bar.ticks, 32 + 32 + 96);
    }

    #[test]
    fn bar_lines_are_ignored() {
        assert!(compile("c'2 | d'2").is_ok());
    }

    #[test]
    fn rests_and_chords() {
        let bar = compile("r4 <c' e' g'>2.").unwrap();
        assert!(bar.steps[0].rest);
        assert_eq!(bar.steps[1].midi, vec![60.0, 64.0, 67.0]);
        assert_eq!(bar.steps[1].duration, 192);
    }

    #[test]
    fn chords_reject_non_pitch_characters() {
        assert!(compile("<c' e'4>1").is_err());
        let unclosed = vec!["<c'".to_string(), "e'1".to_string()];
        assert!(compile_line(&unclosed, &MelodyContext::default()).is_err());
    }

    #[test]
    fn repetition() {
        let bar = compile("c'8*4 [d'8 e']*2").unwrap();
        assert_eq!(bar.steps.len(), 8);
        assert_approx_eq!(bar.steps[5].midi[0], 64.0);
        let nested = compile("[[c'16 d']*2 e'8]*2 f'4").unwrap();
        assert_eq!(nested.steps.len(), 11);
    }

    #[test]
    fn unbalanced_groups() {
        assert!(compile("[c'4 d'4").is_err());
        assert!(compile("c'4 d'4]*2").is_err());
        assert!(compile("c'4*0").is_err());
    }

    #[test]
    fn triplets_take_the_time_of_two() {
        let bar = compile("c'8/3/2 d'/3/2 e'/3/2 f'4 g'2").unwrap();
        let durations: Vec<u32> = bar.steps.iter().map(|s| s.duration).collect();
        assert_eq!(durations, vec![21, 21, 22, 64, 128]);
    }

    #[test]
    fn adjacent_tuplets_are_distributed_as_one_run() {
        let bar = compile("c'8/3/2 d'/3/2 e'/3/2 f'/3/2 g'/3/2 a'/3/2 b'2").unwrap();
        let durations: Vec<u32> = bar.steps.iter().map(|s| s.duration).collect();
        assert_eq!(&durations[..6], &[21, 21, 22, 21, 21, 22]);
        assert_eq!(bar.ticks, 256);
    }

    #[test]
    fn suffixes_are_recognised() {
        let bar = compile("c'4-.\\ff( d'-> e')~ e'^\"dolce\"").unwrap();
        let first = &bar.steps[0];
        assert_eq!(first.articulations, vec![Articulation::Staccato]);
        assert_eq!(first.dynamic_mark, Dynamic::parse("ff"));
        assert!(first.slur_start);
        assert!(bar.steps[1].slurred);
        assert!(bar.steps[2].slur_end && bar.steps[2].tie);
        assert_eq!(bar.steps[3].texts[0].text, "dolce");
    }

    #[test]
    fn unknown_marker_is_an_error() {
        assert!(compile("c'1\\loud").is_err());
        assert!(compile("c'1-x").is_err());
        assert!(compile("c'1?").is_err());
    }

    #[test]
    fn tie_rules() {
        assert!(compile("c'2~ c'2").is_ok());
        assert!(compile("c'2~ d'2").is_err());
        assert!(compile("c'2~ r2").is_err());
        assert!(compile("r2~ c'2").is_err());
    }

    #[test]
    fn trailing_tie_links_forward() {
        let bar = compile("c'2 d'2~").unwrap();
        assert!(bar.link_forward);
        let slurred = compile("c'2( d'2").unwrap();
        assert!(slurred.link_forward && slurred.slur_open);
        assert!(!compile("c'2( d'2)").unwrap().link_forward);
    }

    #[test]
    fn slur_open_from_previous_bar() {
        let ctx = MelodyContext {
            slur_open: true,
            ..MelodyContext::default()
        };
        let bar = compile_line(&line("c'2 d'2)"), &ctx).unwrap();
        assert!(bar.steps[0].slurred);
        assert!(!bar.slur_open);
        assert!(compile("c'2 d'2)").is_err());
    }

    #[test]
    fn dynamics_carry_and_default_to_mezzo_forte() {
        let bar = compile("c'4 d'\\p e' f'").unwrap();
        assert_approx_eq!(bar.steps[0].dynamic, 0.6);
        assert_approx_eq!(bar.steps[2].dynamic, 0.4);
        assert_approx_eq!(bar.end_dynamic, 0.4);
    }

    #[test]
    fn crescendo_interpolates_toward_the_next_mark() {
        let bar = compile("c'4\\p\\< d' e' f'\\f").unwrap();
        assert_approx_eq!(bar.steps[0].dynamic, 0.4);
        assert_approx_eq!(bar.steps[1].dynamic, 0.5);
        assert_approx_eq!(bar.steps[2].dynamic, 0.6);
        assert_approx_eq!(bar.steps[3].dynamic, 0.7);
    }

    #[test]
    fn unterminated_ramp_moves_one_step() {
        let bar = compile("c'2\\mf\\> d'2").unwrap();
        assert_approx_eq!(bar.steps[1].dynamic, 0.55);
        assert_approx_eq!(bar.end_dynamic, 0.5);
        let ended = compile("c'4\\p\\< d' e'\\! f'").unwrap();
        assert_approx_eq!(ended.steps[2].dynamic, 0.5);
        assert_approx_eq!(ended.steps[3].dynamic, 0.5);
    }

    #[test]
    fn natural_signs_follow_altered_notes() {
        let bar = compile("cis'4 c' d' c'").unwrap();
        assert_eq!(bar.steps[0].pitches[0].shown, Accidental::Sharp);
        assert_eq!(bar.steps[1].pitches[0].shown, Accidental::Natural);
        assert_eq!(bar.steps[3].pitches[0].shown, Accidental::None);
    }

    #[test]
    fn natural_signs_by_octave() {
        let toks = line("cis'2 c''2");
        let bar = compile_line(&toks, &MelodyContext::default()).unwrap();
        assert_eq!(bar.steps[1].pitches[0].shown, Accidental::Natural);
        let ctx = MelodyContext {
            same_octave_only: true,
            ..MelodyContext::default()
        };
        let bar = compile_line(&toks, &ctx).unwrap();
        assert_eq!(bar.steps[1].pitches[0].shown, Accidental::None);
    }

    #[test]
    fn transposition_and_ottava() {
        let ctx = MelodyContext {
            transpose: -2,
            ..MelodyContext::default()
        };
        let bar = compile_line(&line("c'2 c'2o1"), &ctx).unwrap();
        assert_approx_eq!(bar.steps[0].midi[0], 58.0);
        assert_approx_eq!(bar.steps[1].midi[0], 70.0);
    }

    #[test]
    fn clusters_fill_the_range() {
        let bar = compile("<c' e'>1@").unwrap();
        assert_eq!(bar.steps[0].midi, vec![60.0, 61.0, 62.0, 63.0, 64.0]);
        assert!(compile("c'1@").is_err());
    }

    #[test]
    fn rhythm_staff_uses_implicit_pitch() {
        let ctx = MelodyContext {
            rhythm_only: true,
            ..MelodyContext::default()
        };
        let bar = compile_line(&line("4 8 8 r4 4"), &ctx).unwrap();
        assert!(bar.steps[0].rhythm_only);
        assert_approx_eq!(bar.steps[0].midi[0], 71.0);
        assert!(compile("4 4 4 4").is_err());
    }

    #[test]
    fn source_recompiles_to_the_same_events() {
        for src in [
            "c'4-.\\ff( d'8 e')~ e'4 r4",
            "<c' e'>8/3/2 d'/3/2 e'/3/2 f'4\\< g'2\\p",
            "bes,2^\"pizz.\" r4 fis''4\\gliss",
        ] {
            let bar = compile(src).unwrap();
            let again = compile(&bar.to_source()).unwrap();
            assert_eq!(bar, again, "{src}");
        }
    }
}
