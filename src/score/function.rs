//! Functions (macros) and their scheduler bindings.

use crate::dsl::error::ParseError;

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_ARGS: usize = 9;
pub const MAX_ARG_LEN: usize = 64;

/// What a bound function is triggered by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindTarget {
    /// A step of an instrument, by instrument id.
    Instrument(usize),
    Beat,
    Bar,
    Loop,
    Framerate,
    Finish,
}

impl BindTarget {
    pub fn parse_keyword(s: &str) -> Option<Self> {
        match s {
            "beat" => Some(BindTarget::Beat),
            "bar" => Some(BindTarget::Bar),
            "loop" => Some(BindTarget::Loop),
            "framerate" => Some(BindTarget::Framerate),
            "finish" => Some(BindTarget::Finish),
            _ => None,
        }
    }
}

/// A function's binding as configured from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub target: BindTarget,
    /// Step (0-based) of the instrument at which the function fires.
    pub step: usize,
    /// Added to `step` after every call.
    pub increment: usize,
    /// Unbind after this many calls.
    pub repeat: Option<u32>,
    /// Function called once the binding is released.
    pub chained: Option<String>,
}

impl Binding {
    pub fn new(target: BindTarget) -> Self {
        Self {
            target,
            step: 0,
            increment: 0,
            repeat: None,
            chained: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Body lines, with `$1`..`$9` argument slots.
    pub body: Vec<String>,
    pub binding: Option<Binding>,
    /// Function to call when this one is unbound.
    pub on_unbind: Option<String>,
}

impl Function {
    pub fn new(name: &str, body: Vec<String>) -> Result<Self, ParseError> {
        check_name(name)?;
        Ok(Self {
            name: name.to_string(),
            body,
            binding: None,
            on_unbind: None,
        })
    }

    /// Highest argument slot the body refers to.
    pub fn arity(&self) -> usize {
        let mut max = 0;
        for line in &self.body {
            let bytes = line.as_bytes();
            for (i, &b) in bytes.iter().enumerate() {
                if b == b'$' {
                    if let Some(d) = bytes.get(i + 1).filter(|d| (b'1'..=b'9').contains(d)) {
                        max = max.max((d - b'0') as usize);
                    }
                }
            }
        }
        max
    }

    /// Body lines with arguments substituted.
    pub fn instantiate(&self, args: &[String]) -> Result<Vec<String>, ParseError> {
        if args.len() > MAX_ARGS {
            return Err(ParseError::command(format!(
                "function {} takes at most {MAX_ARGS} arguments",
                self.name
            )));
        }
        if let Some(arg) = args.iter().find(|a| a.len() > MAX_ARG_LEN) {
            return Err(ParseError::command(format!(
                "argument '{arg}' is longer than {MAX_ARG_LEN} characters"
            )));
        }
        let needed = self.arity();
        if args.len() < needed {
            return Err(ParseError::command(format!(
                "function {} needs {needed} arguments, got {}",
                self.name,
                args.len()
            )));
        }
        let lines = self
            .body
            .iter()
            .map(|line| {
                let mut out = line.clone();
                // highest slot first so $1 does not clobber a later $1x
                for (i, arg) in args.iter().enumerate().rev() {
                    out = out.replace(&format!("${}", i + 1), arg);
                }
                out
            })
            .collect();
        Ok(lines)
    }
}

fn check_name(name: &str) -> Result<(), ParseError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ParseError::command(format!(
            "function name is longer than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(body: &[&str]) -> Function {
        Function::new("f", body.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn arguments_are_substituted() {
        let f = func(&["\\$1 $2 $2"]);
        assert_eq!(f.arity(), 2);
        let lines = f.instantiate(&["vln".into(), "c'1".into()]).unwrap();
        assert_eq!(lines, vec!["\\vln c'1 c'1".to_string()]);
    }

    #[test]
    fn missing_arguments() {
        let f = func(&["\\tempo $3"]);
        assert!(f.instantiate(&["1".into()]).is_err());
    }

    #[test]
    fn bounds() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(Function::new(&long, Vec::new()).is_err());
        let f = func(&["\\play"]);
        let too_many: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert!(f.instantiate(&too_many).is_err());
        assert!(f.instantiate(&["y".repeat(MAX_ARG_LEN + 1)]).is_err());
    }

    #[test]
    fn bind_keywords() {
        assert_eq!(BindTarget::parse_keyword("beat"), Some(BindTarget::Beat));
        assert!(BindTarget::parse_keyword("vln").is_none());
    }
}
