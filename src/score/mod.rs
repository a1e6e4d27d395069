//! Score data model: instruments, bars, loops, functions, lists, groups and
//! remote clients, sharing one global namespace.

pub mod bar;
pub mod event;
pub mod function;
pub mod graph;
pub mod instrument;
pub mod list;

use std::collections::BTreeMap;

pub use bar::{Bar, Meter, Tempo};
pub use event::{BarEvents, StepEvent};
pub use function::{BindTarget, Binding, Function};
pub use graph::{BarGraph, Loop, DEFAULT_BAR};
pub use instrument::{Clef, Instrument, Route};
pub use list::List;

use crate::dsl::error::ParseError;
use event::Dynamic;

/// A remote display client as declared with `\osc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub delay_ms: u32,
}

/// Words that may never name a symbol besides the built-in commands.
const RESERVED: [&str; 4] = ["gliss", "tuplet", "ottava", "cluster"];

/// Every symbol table the dispatcher resolves names against.
#[derive(Debug, Default)]
pub struct Score {
    /// Indexed by instrument id; deleted instruments leave `None`.
    pub instruments: Vec<Option<Instrument>>,
    pub graph: BarGraph,
    pub functions: BTreeMap<String, Function>,
    pub lists: BTreeMap<String, List>,
    /// Group name to member instrument ids.
    pub groups: BTreeMap<String, Vec<usize>>,
    pub clients: BTreeMap<String, ClientInfo>,
}

/// Which table a name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Instrument(usize),
    BarOrLoop(usize),
    Function,
    List,
    Client,
    Group,
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instrument(&self, id: usize) -> Option<&Instrument> {
        self.instruments.get(id).and_then(Option::as_ref)
    }

    pub fn instrument_mut(&mut self, id: usize) -> Option<&mut Instrument> {
        self.instruments.get_mut(id).and_then(Option::as_mut)
    }

    pub fn instrument_id(&self, name: &str) -> Option<usize> {
        self.live_instruments().find(|i| i.name == name).map(|i| i.id)
    }

    pub fn live_instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter().flatten()
    }

    pub fn live_instruments_mut(&mut self) -> impl Iterator<Item = &mut Instrument> {
        self.instruments.iter_mut().flatten()
    }

    /// Resolve a name in dispatch order.
    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        if let Some(id) = self.instrument_id(name) {
            return Some(Symbol::Instrument(id));
        }
        if let Some(index) = self.graph.lookup(name) {
            return Some(Symbol::BarOrLoop(index));
        }
        if self.functions.contains_key(name) {
            return Some(Symbol::Function);
        }
        if self.lists.contains_key(name) {
            return Some(Symbol::List);
        }
        if self.clients.contains_key(name) {
            return Some(Symbol::Client);
        }
        if self.groups.contains_key(name) {
            return Some(Symbol::Group);
        }
        None
    }

    /// A name for a new symbol must be a plain identifier that is neither
    /// reserved nor taken.
    pub fn check_new_name(&self, name: &str) -> Result<(), ParseError> {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ParseError::command(format!("'{name}' is not a valid name")));
        }
        if crate::command::is_builtin(name) || Dynamic::is_dynamic_name(name) || RESERVED.contains(&name)
        {
            return Err(ParseError::command(format!("'{name}' is a reserved word")));
        }
        if self.resolve(name).is_some() {
            return Err(ParseError::command(format!("the name '{name}' is already in use")));
        }
        Ok(())
    }

    /// Create an instrument with the next id.
    pub fn add_instrument(&mut self, name: &str) -> Result<usize, ParseError> {
        self.check_new_name(name)?;
        let id = self.instruments.len();
        self.instruments.push(Some(Instrument::new(id, name)));
        Ok(id)
    }

    pub fn remove_instrument(&mut self, id: usize) -> Option<Instrument> {
        let removed = self.instruments.get_mut(id)?.take();
        for members in self.groups.values_mut() {
            members.retain(|&m| m != id);
        }
        removed
    }

    /// Resolve a list of instrument names.
    pub fn instrument_ids(&self, names: &[String]) -> Result<Vec<usize>, ParseError> {
        names
            .iter()
            .map(|n| {
                self.instrument_id(n)
                    .ok_or_else(|| ParseError::command(format!("no instrument named {n}")))
            })
            .collect()
    }
}
