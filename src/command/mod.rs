//! Command dispatch.
//!
//! A line is a sequence of commands. The head token of each is looked up in
//! the built-in table by its exact name, then by the part before the first
//! dot (`\midiclock.ppqn` runs `midiclock` with the subcommand `ppqn`). Names
//! that are not built in resolve against the score's symbol tables in the
//! order instrument, bar or loop, function, list, remote client, group.
//!
//! A handler reports how many tokens after the head it used, and may return
//! replacement tokens that are dispatched in its place.

pub mod define;
pub mod info;
pub mod inline;
pub mod io;
pub mod symbol;
pub mod transport;

use std::collections::HashMap;

use crate::dsl::error::{ParseError, Severity};
use crate::dsl::expand::brace_group;
use crate::score::Symbol;
use crate::session::Session;

pub type Handler = fn(&mut Session, &CommandInput) -> Result<CommandOutput, ParseError>;

/// One command occurrence as seen by a handler.
#[derive(Debug, Clone)]
pub struct CommandInput {
    /// Name as written, without the backslash.
    pub name: String,
    /// Name up to the first dot.
    pub base: String,
    /// Part after the first dot.
    pub sub: Option<String>,
    /// Tokens up to the next command or an unmatched `}`. Brace groups are
    /// included whole.
    pub args: Vec<String>,
    /// Every token after the head.
    pub rest: Vec<String>,
    /// The line was typed, not produced by a function body.
    pub top_level: bool,
}

impl CommandInput {
    pub fn new(name: &str, rest: &[String], top_level: bool) -> Self {
        let (base, sub) = match name.split_once('.') {
            Some((base, sub)) => (base.to_string(), Some(sub.to_string())),
            None => (name.to_string(), None),
        };
        Self {
            name: name.to_string(),
            base,
            sub,
            args: collect_args(rest),
            rest: rest.to_vec(),
            top_level,
        }
    }

    pub fn sub(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(String::as_str)
    }

    /// The words of the argument: the contents of a leading brace group,
    /// otherwise the plain arguments. Returns the words and the tokens used.
    pub fn words(&self) -> (Vec<String>, usize) {
        match brace_group(&self.rest, 0) {
            Some((contents, span)) => (contents, span),
            None => (self.args.clone(), self.args.len()),
        }
    }

    /// Words after the first argument, braced or plain.
    pub fn words_after_first(&self) -> (Vec<String>, usize) {
        if self.rest.is_empty() {
            return (Vec::new(), 0);
        }
        match brace_group(&self.rest, 1) {
            Some((contents, span)) => (contents, 1 + span),
            None => (self.args[1.min(self.args.len())..].to_vec(), self.args.len()),
        }
    }

    /// Exactly `n` plain arguments.
    pub fn expect_args(&self, n: usize) -> Result<&[String], ParseError> {
        if self.args.len() < n {
            return Err(ParseError::command(format!(
                "\\{} needs {n} argument{}",
                self.name,
                if n == 1 { "" } else { "s" }
            )));
        }
        Ok(&self.args[..n])
    }
}

/// Result of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// Replacement for the head and the consumed tokens.
    pub tokens: Vec<String>,
    /// Tokens after the head this command used.
    pub consumed: usize,
    pub severity: Severity,
    pub message: String,
}

impl CommandOutput {
    pub fn done(consumed: usize) -> Self {
        Self {
            tokens: Vec::new(),
            consumed,
            severity: Severity::None,
            message: String::new(),
        }
    }

    pub fn note(consumed: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Note,
            message: message.into(),
            ..Self::done(consumed)
        }
    }

    pub fn warning(consumed: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            ..Self::done(consumed)
        }
    }

    pub fn rewrite(consumed: usize, tokens: Vec<String>) -> Self {
        Self {
            tokens,
            ..Self::done(consumed)
        }
    }

    /// Fold `other` into this summary and hand back its replacement tokens.
    pub(crate) fn absorb(&mut self, other: CommandOutput) -> Vec<String> {
        self.severity = self.severity.max(other.severity);
        if !other.message.is_empty() {
            if !self.message.is_empty() {
                self.message.push('\n');
            }
            self.message.push_str(&other.message);
        }
        other.tokens
    }
}

const BUILTINS: &[(&str, Handler)] = &[
    ("bar", define::bar),
    ("loop", define::loop_),
    ("function", define::function),
    ("list", define::list),
    ("insts", define::insts),
    ("delete", define::delete),
    ("group", define::group),
    ("ungroup", define::ungroup),
    ("}", define::close),
    ("time", define::time),
    ("tempo", define::tempo),
    ("play", transport::play),
    ("stop", transport::stop),
    ("stopnow", transport::stop_now),
    ("finish", transport::finish),
    ("countdown", transport::countdown),
    ("goto", transport::goto),
    ("mute", transport::mute),
    ("unmute", transport::unmute),
    ("mutenow", transport::mute_now),
    ("unmutenow", transport::unmute_now),
    ("solo", transport::solo),
    ("unsolo", transport::unsolo),
    ("solonow", transport::solo_now),
    ("unsolonow", transport::unsolo_now),
    ("midiclock", transport::midiclock),
    ("framerate", transport::framerate),
    ("unbindall", transport::unbind_all),
    ("midiports", io::midiports),
    ("openmidiport", io::openmidiport),
    ("osc", io::osc),
    ("listen", io::listen),
    ("tuplet", inline::unexpanded),
    ("ottava", inline::unexpanded),
    ("cluster", inline::unexpanded),
    ("print", info::print),
    ("active", info::active),
    ("score.correctoctave", info::correct_octave),
    ("bars", info::bars),
    ("loops", info::loops),
    ("functions", info::functions),
    ("lists", info::lists),
    ("insts.list", info::insts_list),
    ("groups", info::groups),
    ("errors", info::errors),
    ("status", info::status),
];

pub fn builtin_table() -> HashMap<&'static str, Handler> {
    BUILTINS.iter().copied().collect()
}

/// Whether `name` is the name of a built-in command.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|(n, _)| *n == name)
}

/// Run the command at the head of `tokens`.
pub fn dispatch(session: &mut Session, tokens: &[String], top_level: bool) -> Result<CommandOutput, ParseError> {
    let Some(head) = tokens.first() else {
        return Ok(CommandOutput::done(0));
    };
    let name = if head == "}" {
        "}"
    } else {
        head.strip_prefix('\\')
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ParseError::command(format!("expected a command, found '{head}'")))?
    };
    let input = CommandInput::new(name, &tokens[1..], top_level);

    if let Some(handler) = session.handler(name) {
        tracing::debug!(command = name, "built-in");
        return handler(session, &input);
    }
    if input.sub.is_some() {
        if let Some(handler) = session.handler(&input.base) {
            tracing::debug!(command = name, "built-in with subcommand");
            return handler(session, &input);
        }
    }

    match session.score.resolve(&input.base) {
        Some(Symbol::Instrument(id)) => symbol::instrument(session, &input, id),
        Some(Symbol::BarOrLoop(index)) => symbol::bar_or_loop(session, &input, index),
        Some(Symbol::Function) => symbol::function(session, &input),
        Some(Symbol::List) => symbol::list(session, &input),
        Some(Symbol::Client) => symbol::client(session, &input),
        Some(Symbol::Group) => symbol::group(session, &input),
        None => Err(ParseError::command(format!("unknown command \\{name}"))),
    }
}

/// Tokens up to the next command token or an unmatched `}` at depth 0.
fn collect_args(rest: &[String]) -> Vec<String> {
    let mut depth = 0usize;
    let mut args = Vec::new();
    for tok in rest {
        match tok.as_str() {
            "{" => depth += 1,
            "}" if depth == 0 => break,
            "}" => depth -= 1,
            t if depth == 0 && t.len() > 1 && t.starts_with('\\') => break,
            _ => {}
        }
        args.push(tok.clone());
    }
    args
}

/// Parse an `on`/`off` switch.
pub(crate) fn parse_switch(input: &CommandInput, value: Option<&str>) -> Result<bool, ParseError> {
    match value {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        Some(other) => Err(ParseError::command(format!(
            "\\{} expects on or off, got '{other}'",
            input.name
        ))),
        None => Err(ParseError::command(format!("\\{} expects on or off", input.name))),
    }
}

/// Parse an integer argument within `range`.
pub(crate) fn parse_number<T>(input: &CommandInput, value: Option<&str>, range: std::ops::RangeInclusive<T>) -> Result<T, ParseError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = value else {
        return Err(ParseError::command(format!(
            "\\{} needs a number between {} and {}",
            input.name,
            range.start(),
            range.end()
        )));
    };
    let n: T = value
        .parse()
        .map_err(|_| ParseError::command(format!("\\{}: '{value}' is not a number", input.name)))?;
    if !range.contains(&n) {
        return Err(ParseError::command(format!(
            "\\{}: {n} is outside {}..{}",
            input.name,
            range.start(),
            range.end()
        )));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn args_stop_at_the_next_command() {
        let input = CommandInput::new("vln", &toks("c'4 d'4 \\vla e'2"), true);
        assert_eq!(input.args, toks("c'4 d'4"));
        assert_eq!(input.rest.len(), 4);
    }

    #[test]
    fn args_stop_at_an_unmatched_brace() {
        let input = CommandInput::new("vln", &toks("c'1 } \\play"), true);
        assert_eq!(input.args, toks("c'1"));
    }

    #[test]
    fn brace_groups_are_kept_whole() {
        let input = CommandInput::new("function", &toks("f { \\vln $1 } \\f"), true);
        assert_eq!(input.args, toks("f { \\vln $1 }"));
        let (words, used) = input.words_after_first();
        assert_eq!(words, toks("\\vln $1"));
        assert_eq!(used, 5);
    }

    #[test]
    fn dotted_names_split_once() {
        let input = CommandInput::new("midiclock.ppqn", &toks("48"), true);
        assert_eq!(input.base, "midiclock");
        assert_eq!(input.sub(), Some("ppqn"));
    }

    #[test]
    fn words_prefer_a_brace_group() {
        let input = CommandInput::new("group", &toks("{ a b } c"), true);
        assert_eq!(input.words(), (toks("a b"), 4));
        let plain = CommandInput::new("group", &toks("a b"), true);
        assert_eq!(plain.words(), (toks("a b"), 2));
    }

    #[test]
    fn absorb_keeps_the_worst_severity() {
        let mut summary = CommandOutput::done(0);
        summary.absorb(CommandOutput::warning(0, "careful"));
        let tokens = summary.absorb(CommandOutput::rewrite(1, toks("\\a")));
        assert_eq!(summary.severity, Severity::Warning);
        assert_eq!(summary.message, "careful");
        assert_eq!(tokens, toks("\\a"));
    }

    #[test]
    fn builtin_names() {
        assert!(is_builtin("play"));
        assert!(is_builtin("insts.list"));
        assert!(!is_builtin("vln"));
    }
}
