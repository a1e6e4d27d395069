//! Line tokenizer.
//!
//! Splits one line of input into whitespace-separated tokens while keeping
//! chords (`<c e g>4`) and quoted strings intact. Curly braces always become
//! tokens of their own, and `%` starts a comment that runs to the end of the
//! line.

use super::error::ParseError;

pub struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
}

impl Tokenizer {
    pub fn new(line: &str) -> Self {
        Self {
            chars: line.chars().collect(),
            pos: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<String>, ParseError> {
        let mut tokens = Vec::new();
        let mut current = String::new();

        while !self.is_at_end() {
            let ch = self.peek();
            match ch {
                c if c.is_whitespace() => {
                    self.advance();
                    flush(&mut current, &mut tokens);
                }
                '%' => break,
                '{' | '}' => {
                    self.advance();
                    flush(&mut current, &mut tokens);
                    tokens.push(ch.to_string());
                }
                '"' => {
                    let s = self.lex_string()?;
                    current.push_str(&s);
                }
                '<' if opens_chord(&current) => {
                    let chord = self.lex_chord()?;
                    current.push_str(&chord);
                }
                _ => {
                    current.push(self.advance());
                }
            }
        }
        flush(&mut current, &mut tokens);

        Ok(tokens)
    }

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn lex_string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let mut s = String::new();
        s.push(self.advance()); // opening '"'
        while !self.is_at_end() && self.peek() != '"' {
            s.push(self.advance());
        }
        if self.is_at_end() {
            return Err(ParseError::token(format!(
                "unclosed string starting at column {}",
                start + 1
            )));
        }
        s.push(self.advance()); // closing '"'
        Ok(s)
    }

    fn lex_chord(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let mut s = String::new();
        s.push(self.advance()); // '<'
        while !self.is_at_end() {
            let ch = self.advance();
            match ch {
                '>' => {
                    if s.ends_with(' ') {
                        s.pop();
                    }
                    s.push(ch);
                    return Ok(s);
                }
                '<' => {
                    return Err(ParseError::token(format!(
                        "nested chord at column {}",
                        self.pos
                    )));
                }
                c if c.is_whitespace() => {
                    // collapse runs of whitespace inside chords
                    if !s.ends_with(' ') && s.len() > 1 {
                        s.push(' ');
                    }
                }
                c => s.push(c),
            }
        }
        Err(ParseError::token(format!(
            "unclosed chord starting at column {}",
            start + 1
        )))
    }
}

/// A `<` opens a chord unless it belongs to `\<` (crescendo) or `->` (accent).
fn opens_chord(current: &str) -> bool {
    !matches!(current.chars().last(), Some('\\') | Some('-'))
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Tokenize a line. Convenience wrapper around [`Tokenizer`].
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    Tokenizer::new(line).tokenize()
}
