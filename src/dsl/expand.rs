//! Command expansion.
//!
//! Tokens are scanned right-to-left. Every token that starts with `\` is
//! offered to an [`InlineCommands`] implementation together with its argument
//! (the next token, or the contents of a following `{ ... }` group) and the
//! already expanded tokens to its right. The implementation either leaves the
//! token alone or rewrites it: `to_pop` buffered tokens are removed and the
//! produced tokens are pushed back onto the scan stack, so commands produced
//! by an expansion are expanded as well.

use std::collections::VecDeque;

use super::error::ParseError;

/// Upper bound on rewrites per line; a list that contains itself would
/// otherwise expand forever.
pub const MAX_REWRITES: usize = 256;

/// One command occurrence offered to the inline-command hook.
#[derive(Debug)]
pub struct CommandCall<'a> {
    /// Command name without the leading backslash.
    pub name: &'a str,
    /// The single following token, or the contents of a following brace group.
    pub args: Vec<String>,
    /// Whether `args` came from a brace group.
    pub braced: bool,
    /// Number of buffered tokens occupied by the argument (braces included).
    pub arg_span: usize,
    /// Every already expanded token to the right of the command.
    pub rest: &'a [String],
}

impl CommandCall<'_> {
    /// Tokens following the argument.
    pub fn trailing(&self) -> &[String] {
        &self.rest[self.arg_span.min(self.rest.len())..]
    }
}

/// The replacement produced by an inline command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expansion {
    pub tokens: Vec<String>,
    pub to_pop: usize,
}

/// Hook through which the expander asks whether a command expands inline.
pub trait InlineCommands {
    /// Return `Ok(None)` to keep the command token as it is.
    fn expand_call(&mut self, call: &CommandCall<'_>) -> Result<Option<Expansion>, ParseError>;
}

/// If `tokens[start]` opens a brace group, return its contents and the number
/// of tokens the group spans including both braces.
pub fn brace_group(tokens: &[String], start: usize) -> Option<(Vec<String>, usize)> {
    if tokens.get(start).map(String::as_str) != Some("{") {
        return None;
    }
    let mut depth = 0usize;
    for (i, tok) in tokens[start..].iter().enumerate() {
        match tok.as_str() {
            "{" => depth += 1,
            "}" => {
                depth -= 1;
                if depth == 0 {
                    let contents = tokens[start + 1..start + i].to_vec();
                    return Some((contents, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Expand every inline command in `tokens`.
pub fn expand<H: InlineCommands>(tokens: Vec<String>, hook: &mut H) -> Result<Vec<String>, ParseError> {
    let mut pending = tokens;
    let mut buffer: VecDeque<String> = VecDeque::with_capacity(pending.len());
    let mut rewrites = 0usize;

    while let Some(tok) = pending.pop() {
        if !is_command(&tok) {
            buffer.push_front(tok);
            continue;
        }

        let rest = buffer.make_contiguous();
        let (args, braced, arg_span) = match brace_group(rest, 0) {
            Some((contents, span)) => (contents, true, span),
            None => match rest.first() {
                Some(first) if first != "{" && first != "}" => (vec![first.clone()], false, 1),
                _ => (Vec::new(), false, 0),
            },
        };
        let call = CommandCall {
            name: &tok[1..],
            args,
            braced,
            arg_span,
            rest,
        };

        match hook.expand_call(&call)? {
            None => buffer.push_front(tok),
            Some(expansion) => {
                rewrites += 1;
                if rewrites > MAX_REWRITES {
                    return Err(ParseError::expand(format!(
                        "expansion of \\{} does not terminate",
                        &tok[1..]
                    )));
                }
                if expansion.to_pop > buffer.len() {
                    return Err(ParseError::expand(format!(
                        "\\{} consumed more tokens than available",
                        &tok[1..]
                    )));
                }
                buffer.drain(..expansion.to_pop);
                pending.extend(expansion.tokens);
            }
        }
    }

    Ok(buffer.into_iter().collect())
}

fn is_command(tok: &str) -> bool {
    tok.len() > 1 && tok.starts_with('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    /// Test hook: `\twice` duplicates its argument, `\wrap {..}` upper-cases a
    /// group, `\loopy` re-emits itself.
    struct Hook {
        calls: Vec<String>,
    }

    impl InlineCommands for Hook {
        fn expand_call(&mut self, call: &CommandCall<'_>) -> Result<Option<Expansion>, ParseError> {
            self.calls.push(call.name.to_string());
            match call.name {
                "twice" => {
                    let arg = call.args.first().cloned().unwrap_or_default();
                    Ok(Some(Expansion {
                        tokens: vec![arg.clone(), arg],
                        to_pop: call.arg_span,
                    }))
                }
                "wrap" => {
                    if !call.braced {
                        return Err(ParseError::expand("\\wrap needs a group"));
                    }
                    Ok(Some(Expansion {
                        tokens: call.args.iter().map(|a| a.to_uppercase()).collect(),
                        to_pop: call.arg_span,
                    }))
                }
                "loopy" => Ok(Some(Expansion {
                    tokens: vec!["\\loopy".to_string()],
                    to_pop: 0,
                })),
                "fail" => Err(ParseError::expand("boom")),
                _ => Ok(None),
            }
        }
    }

    fn hook() -> Hook {
        Hook { calls: Vec::new() }
    }

    #[test]
    fn plain_tokens_pass_through() {
        let out = expand(toks("a b c"), &mut hook()).unwrap();
        assert_eq!(out, toks("a b c"));
    }

    #[test]
    fn unknown_commands_are_kept() {
        let out = expand(toks("\\inst1 c'4"), &mut hook()).unwrap();
        assert_eq!(out, toks("\\inst1 c'4"));
    }

    #[test]
    fn single_argument_is_replaced() {
        let out = expand(toks("x \\twice y z"), &mut hook()).unwrap();
        assert_eq!(out, toks("x y y z"));
    }

    #[test]
    fn brace_group_argument() {
        let out = expand(toks("x \\wrap { a { b } c } d"), &mut hook()).unwrap();
        assert_eq!(out, toks("x A { B } C d"));
    }

    #[test]
    fn scans_right_to_left() {
        let mut h = hook();
        expand(toks("\\first \\second \\third"), &mut h).unwrap();
        assert_eq!(h.calls, vec!["third", "second", "first"]);
    }

    #[test]
    fn output_is_rescanned() {
        // \twice \twice a: inner expands first to "a a", then outer sees "a".
        let out = expand(toks("\\twice \\twice a"), &mut hook()).unwrap();
        assert_eq!(out, toks("a a a"));
    }

    #[test]
    fn nested_command_output_is_rescanned() {
        // \wrap expands first; \twice then sees its output as the argument.
        let out = expand(toks("\\twice \\wrap { q }"), &mut hook()).unwrap();
        assert_eq!(out, toks("Q Q"));
    }

    #[test]
    fn error_short_circuits() {
        let mut h = hook();
        assert!(expand(toks("\\twice a \\fail b"), &mut h).is_err());
        assert_eq!(h.calls, vec!["fail"]);
    }

    #[test]
    fn runaway_expansion_is_rejected() {
        let err = expand(toks("\\loopy"), &mut hook()).unwrap_err();
        assert!(err.message.contains("does not terminate"));
    }

    #[test]
    fn brace_group_reports_span() {
        let tokens = toks("{ a { b } } c");
        let (contents, span) = brace_group(&tokens, 0).unwrap();
        assert_eq!(contents, toks("a { b }"));
        assert_eq!(span, 6);
        assert!(brace_group(&tokens, 1).is_none());
    }

    #[test]
    fn unbalanced_group_is_not_an_argument() {
        let mut h = hook();
        let out = expand(toks("\\keep {"), &mut h).unwrap();
        assert_eq!(out, toks("\\keep {"));
    }
}
