//! Commands resolved during expansion: `\tuplet`, `\ottava`, `\cluster` and
//! list element access.

use crate::dsl::duration::TupletRatio;
use crate::dsl::error::ParseError;
use crate::dsl::expand::{brace_group, CommandCall, Expansion, InlineCommands};
use crate::dsl::note::parse_pitch_prefix;
use crate::session::Session;

use super::{CommandInput, CommandOutput};

impl InlineCommands for Session {
    fn expand_call(&mut self, call: &CommandCall<'_>) -> Result<Option<Expansion>, ParseError> {
        match call.name {
            "tuplet" => tuplet(call).map(Some),
            "ottava" => ottava(call).map(Some),
            "cluster" => cluster(call).map(Some),
            name => self.list_element(name, call),
        }
    }
}

impl Session {
    /// `\list N` becomes element N; `\list.size` becomes the element count
    /// unless it ends the line, where it prints instead.
    fn list_element(&self, name: &str, call: &CommandCall<'_>) -> Result<Option<Expansion>, ParseError> {
        if let Some((base, "size")) = name.split_once('.') {
            let Some(list) = self.score.lists.get(base) else {
                return Ok(None);
            };
            if call.rest.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Expansion {
                tokens: vec![list.len().to_string()],
                to_pop: 0,
            }));
        }
        let Some(list) = self.score.lists.get(name) else {
            return Ok(None);
        };
        if call.braced {
            return Ok(None);
        }
        let Some(position) = call.args.first().and_then(|a| a.parse::<usize>().ok()) else {
            return Ok(None);
        };
        Ok(Some(Expansion {
            tokens: vec![list.get(position)?.to_string()],
            to_pop: 1,
        }))
    }
}

/// The `{ ... }` group following a command's first argument.
fn group_after_arg(call: &CommandCall<'_>) -> Result<(Vec<String>, usize), ParseError> {
    if call.braced || call.arg_span == 0 {
        return Err(ParseError::expand(format!(
            "\\{} needs an argument before its {{ }} group",
            call.name
        )));
    }
    brace_group(call.rest, call.arg_span)
        .ok_or_else(|| ParseError::expand(format!("\\{} needs a {{ }} group", call.name)))
}

/// `\tuplet n/d { notes }`
fn tuplet(call: &CommandCall<'_>) -> Result<Expansion, ParseError> {
    let (notes, span) = group_after_arg(call)?;
    let ratio = TupletRatio::parse(&call.args[0])?;
    let suffix = format!("/{}/{}", ratio.num, ratio.den);
    Ok(Expansion {
        tokens: notes.iter().map(|t| with_suffix(t, &suffix)).collect(),
        to_pop: call.arg_span + span,
    })
}

/// `\ottava n { notes }` shifts by n octaves, -3 to 3.
fn ottava(call: &CommandCall<'_>) -> Result<Expansion, ParseError> {
    let (notes, span) = group_after_arg(call)?;
    let shift: i8 = call.args[0]
        .parse()
        .ok()
        .filter(|n: &i8| (-3..=3).contains(n))
        .ok_or_else(|| ParseError::expand(format!("ottava '{}' must be -3 to 3", call.args[0])))?;
    let suffix = format!("o{shift}");
    Ok(Expansion {
        tokens: notes.iter().map(|t| with_suffix(t, &suffix)).collect(),
        to_pop: call.arg_span + span,
    })
}

/// `\cluster { low high }` becomes a chord filled chromatically. Duration
/// and other suffixes are taken from the upper note, else the lower.
fn cluster(call: &CommandCall<'_>) -> Result<Expansion, ParseError> {
    let [low, high] = call.args.as_slice() else {
        return Err(ParseError::expand("\\cluster needs { low high }"));
    };
    if !call.braced {
        return Err(ParseError::expand("\\cluster needs { low high }"));
    }
    let split = |tok: &str| -> Result<(String, String), ParseError> {
        let (_, len) = parse_pitch_prefix(tok)?
            .ok_or_else(|| ParseError::expand(format!("cluster bound '{tok}' is not a pitch")))?;
        Ok((tok[..len].to_string(), tok[len..].to_string()))
    };
    let (low_pitch, low_rest) = split(low)?;
    let (high_pitch, high_rest) = split(high)?;
    let rest = if high_rest.is_empty() { low_rest } else { high_rest };
    let chord = format!("<{low_pitch} {high_pitch}>{rest}");
    Ok(Expansion {
        tokens: vec![with_suffix(&chord, "@")],
        to_pop: call.arg_span,
    })
}

/// Insert `suffix` before any trailing `]` or `*N` so grouping and
/// repetition still apply to the marked note.
fn with_suffix(tok: &str, suffix: &str) -> String {
    if tok == "|" {
        return tok.to_string();
    }
    let mut end = tok.len();
    loop {
        let body = &tok[..end];
        if body.ends_with('"') {
            break;
        }
        if let Some(stripped) = body.strip_suffix(']') {
            end = stripped.len();
            continue;
        }
        match body.rfind('*') {
            Some(star) if star + 1 < body.len() && body[star + 1..].bytes().all(|b| b.is_ascii_digit()) => {
                end = star;
            }
            _ => break,
        }
    }
    format!("{}{suffix}{}", &tok[..end], &tok[end..])
}

/// Reached only when expansion left the command in place.
pub fn unexpanded(_s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    Err(ParseError::expand(format!(
        "\\{} was not followed by its arguments",
        input.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::expand::expand;
    use crate::session::SessionConfig;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn expanded(s: &mut Session, line: &str) -> Result<Vec<String>, ParseError> {
        expand(toks(line), s)
    }

    #[test]
    fn tuplet_marks_every_note() {
        let mut s = Session::new(SessionConfig::default());
        let out = expanded(&mut s, "\\vln \\tuplet 3/2 { c'8 d'8 e'8 } f'4").unwrap();
        assert_eq!(out, toks("\\vln c'8/3/2 d'8/3/2 e'8/3/2 f'4"));
    }

    #[test]
    fn suffix_goes_before_grouping() {
        assert_eq!(with_suffix("c'8]*2", "/3/2"), "c'8/3/2]*2");
        assert_eq!(with_suffix("[c'8", "o1"), "[c'8o1");
        assert_eq!(with_suffix("c'4^\"a*2\"", "o1"), "c'4^\"a*2\"o1");
        assert_eq!(with_suffix("|", "o1"), "|");
    }

    #[test]
    fn ottava_range() {
        let mut s = Session::new(SessionConfig::default());
        let out = expanded(&mut s, "\\ottava -1 { c'4 }").unwrap();
        assert_eq!(out, toks("c'4o-1"));
        assert!(expanded(&mut s, "\\ottava 4 { c'4 }").is_err());
        assert!(expanded(&mut s, "\\ottava { c'4 }").is_err());
    }

    #[test]
    fn cluster_builds_a_chord() {
        let mut s = Session::new(SessionConfig::default());
        let out = expanded(&mut s, "\\cluster { c' g'2 }").unwrap();
        assert_eq!(out, vec!["<c' g'>2@".to_string()]);
        assert!(expanded(&mut s, "\\cluster { c' }").is_err());
        assert!(expanded(&mut s, "\\cluster { r4 c' }").is_err());
    }

    #[test]
    fn list_access() {
        let mut s = Session::new(SessionConfig::default());
        s.parse_line("\\list notes { c'4 d'4 }", 0);
        assert_eq!(expanded(&mut s, "x \\notes 2").unwrap(), toks("x d'4"));
        assert_eq!(expanded(&mut s, "\\notes.size x").unwrap(), toks("2 x"));
        assert_eq!(expanded(&mut s, "\\notes.size").unwrap(), toks("\\notes.size"));
        assert!(expanded(&mut s, "\\notes 3").is_err());
    }

    #[test]
    fn list_elements_are_expanded_again() {
        let mut s = Session::new(SessionConfig::default());
        s.parse_line("\\list inner { e'4 }", 0);
        s.parse_line("\\list outer { \\inner }", 0);
        assert_eq!(expanded(&mut s, "\\outer 1 1").unwrap(), toks("e'4"));
    }

    #[test]
    fn leftover_tuplet_is_an_error() {
        let mut s = Session::new(SessionConfig::default());
        let r = s.parse_line("\\tuplet", 0);
        assert_eq!(r.severity, crate::dsl::error::Severity::Error);
    }
}
