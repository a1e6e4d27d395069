//! Listing and session-state commands.

use crate::dsl::error::ParseError;
use crate::score::graph::Entry;
use crate::score::DEFAULT_BAR;
use crate::session::Session;

use super::{parse_switch, CommandInput, CommandOutput};

/// Diagnostics shown by `\errors`.
const ERRORS_SHOWN: usize = 10;

pub fn print(_s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let (words, used) = input.words();
    Ok(CommandOutput::note(used, words.join(" ")))
}

/// `\active on|off`; without an argument reports the current state.
pub fn active(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    if input.arg(0).is_none() {
        let state = if s.active { "on" } else { "off" };
        return Ok(CommandOutput::note(0, format!("active {state}")));
    }
    let on = parse_switch(input, input.arg(0))?;
    s.set_active(on);
    Ok(CommandOutput::done(1))
}

/// `\score.correctoctave on|off`: natural signs only cancel accidentals in
/// the same octave.
pub fn correct_octave(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    s.same_octave_only = parse_switch(input, input.arg(0))?;
    Ok(CommandOutput::done(1))
}

pub fn bars(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .score
        .graph
        .bars()
        .filter(|b| b.index != DEFAULT_BAR)
        .map(|b| {
            let mut line = format!("{} {} {} {}", b.index, b.name, b.meter, b.tempo);
            if let Some(to) = b.linked_to.and_then(|i| s.score.graph.entry(i)) {
                line.push_str(&format!(" -> {}", to.name()));
            }
            line
        })
        .collect();
    Ok(listing(lines, "no bars"))
}

pub fn loops(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .score
        .graph
        .loops()
        .map(|lp| {
            let names: Vec<&str> = lp
                .bars
                .iter()
                .filter_map(|&i| s.score.graph.entry(i).map(Entry::name))
                .collect();
            format!("{} {}: {}", lp.index, lp.name, names.join(" "))
        })
        .collect();
    Ok(listing(lines, "no loops"))
}

pub fn functions(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .score
        .functions
        .values()
        .map(|f| match &f.binding {
            Some(binding) => format!("{} (bound to {:?})", f.name, binding.target),
            None => f.name.clone(),
        })
        .collect();
    Ok(listing(lines, "no functions"))
}

pub fn lists(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .score
        .lists
        .values()
        .map(|l| format!("{}: {}", l.name, l.items.join(" ")))
        .collect();
    Ok(listing(lines, "no lists"))
}

pub fn insts_list(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .score
        .live_instruments()
        .map(|i| {
            let mut line = format!("{} {} {}", i.id, i.name, i.route);
            if i.transpose != 0 {
                line.push_str(&format!(" transpose {}", i.transpose));
            }
            if i.muted {
                line.push_str(" muted");
            }
            if i.solo {
                line.push_str(" solo");
            }
            line
        })
        .collect();
    Ok(listing(lines, "no instruments"))
}

pub fn groups(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .score
        .groups
        .iter()
        .map(|(name, members)| {
            let names: Vec<&str> = members
                .iter()
                .filter_map(|&id| s.score.instrument(id).map(|i| i.name.as_str()))
                .collect();
            format!("{name}: {}", names.join(" "))
        })
        .collect();
    Ok(listing(lines, "no groups"))
}

pub fn errors(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let lines: Vec<String> = s
        .diagnostics
        .recent(ERRORS_SHOWN)
        .iter()
        .map(|d| match d.line {
            Some(line) => format!("line {}: {}: {}", line + 1, d.severity, d.message),
            None => format!("{}: {}", d.severity, d.message),
        })
        .collect();
    Ok(listing(lines, "no errors"))
}

pub fn status(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let status = s.status();
    let name = |index: usize| {
        s.score
            .graph
            .entry(index)
            .map(|e| e.name().to_string())
            .unwrap_or_else(|| index.to_string())
    };
    let mut message = format!("{} cue {}", status.state.name(), name(s.cue));
    if status.state.is_playing() {
        message.push_str(&format!(
            " loop {} position {} bar {} beat {}",
            name(status.loop_index),
            status.position + 1,
            name(status.bar),
            status.beat
        ));
    }
    if let Some(bar) = s.open_bar() {
        message.push_str(&format!(" defining bar {bar}"));
    }
    Ok(CommandOutput::note(0, message))
}

fn listing(lines: Vec<String>, empty: &str) -> CommandOutput {
    if lines.is_empty() {
        CommandOutput::note(0, empty)
    } else {
        CommandOutput::note(0, lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use crate::dsl::error::Severity;
    use crate::session::{Session, SessionConfig};

    fn run(s: &mut Session, line: &str) -> String {
        let r = s.parse_line(line, 0);
        assert!(r.severity < Severity::Error, "{line}: {}", r.message);
        r.message
    }

    #[test]
    fn print_joins_its_words() {
        let mut s = Session::new(SessionConfig::default());
        assert_eq!(run(&mut s, "\\print hello world"), "hello world");
    }

    #[test]
    fn listings() {
        let mut s = Session::new(SessionConfig::default());
        assert_eq!(run(&mut s, "\\bars"), "no bars");
        run(&mut s, "\\insts vln");
        run(&mut s, "\\bar a { \\vln c'1 }");
        run(&mut s, "\\loop l { a a }");
        assert!(run(&mut s, "\\bars").contains(" a 4/4"));
        assert!(run(&mut s, "\\loops").ends_with("l: a a"));
        assert!(run(&mut s, "\\insts.list").contains("vln midi 0:1"));
    }

    #[test]
    fn errors_lists_recent_problems() {
        let mut s = Session::new(SessionConfig::default());
        s.parse_line("\\bogus", 4);
        assert!(run(&mut s, "\\errors").contains("line 5: error: unknown command \\bogus"));
    }

    #[test]
    fn correct_octave_switch() {
        let mut s = Session::new(SessionConfig::default());
        run(&mut s, "\\score.correctoctave off");
        assert!(!s.same_octave_only);
        assert_eq!(
            s.parse_line("\\score.correctoctave sometimes", 0).severity,
            Severity::Error
        );
    }

    #[test]
    fn status_reports_idle_and_the_cue() {
        let mut s = Session::new(SessionConfig::default());
        assert_eq!(run(&mut s, "\\status"), "idle cue default");
    }
}
