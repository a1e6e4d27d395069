//! Notation front end: tokens → expanded tokens → timed events.

pub mod duration;
pub mod error;
pub mod expand;
pub mod melody;
pub mod note;
pub mod token;

pub use error::{ErrorKind, ParseError, Severity};
pub use expand::{expand, InlineCommands};
pub use melody::{compile_line, MelodyContext};
pub use token::tokenize;
