//! Bar/loop graph.
//!
//! Bars and loops share one index space. Index 0 is the default bar that
//! lines typed outside any bar compile into. Every bar is also a trivial
//! one-bar loop, so anything that plays "a loop" accepts a bar index.

use std::collections::HashMap;

use regex::Regex;

use super::bar::Bar;
use crate::dsl::error::ParseError;

pub const DEFAULT_BAR: usize = 0;
pub const DEFAULT_BAR_NAME: &str = "default";

/// An ordered sequence of bar indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub index: usize,
    pub name: String,
    pub bars: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Bar(Bar),
    Loop(Loop),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Bar(bar) => &bar.name,
            Entry::Loop(lp) => &lp.name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BarGraph {
    entries: Vec<Option<Entry>>,
    names: HashMap<String, usize>,
}

impl Default for BarGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl BarGraph {
    pub fn new() -> Self {
        let default_bar = Bar::new(
            DEFAULT_BAR,
            DEFAULT_BAR_NAME,
            Default::default(),
            Default::default(),
        );
        let mut names = HashMap::new();
        names.insert(DEFAULT_BAR_NAME.to_string(), DEFAULT_BAR);
        Self {
            entries: vec![Some(Entry::Bar(default_bar))],
            names,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub fn bar(&self, index: usize) -> Option<&Bar> {
        match self.entry(index) {
            Some(Entry::Bar(bar)) => Some(bar),
            _ => None,
        }
    }

    pub fn bar_mut(&mut self, index: usize) -> Option<&mut Bar> {
        match self.entries.get_mut(index).and_then(Option::as_mut) {
            Some(Entry::Bar(bar)) => Some(bar),
            _ => None,
        }
    }

    pub fn get_loop(&self, index: usize) -> Option<&Loop> {
        match self.entry(index) {
            Some(Entry::Loop(lp)) => Some(lp),
            _ => None,
        }
    }

    pub fn bars(&self) -> impl DoubleEndedIterator<Item = &Bar> {
        self.entries.iter().filter_map(|e| match e {
            Some(Entry::Bar(bar)) => Some(bar),
            _ => None,
        })
    }

    pub fn loops(&self) -> impl Iterator<Item = &Loop> {
        self.entries.iter().filter_map(|e| match e {
            Some(Entry::Loop(lp)) => Some(lp),
            _ => None,
        })
    }

    /// The bar sequence an index plays: itself for a bar, its bars for a loop.
    pub fn sequence(&self, index: usize) -> Option<Vec<usize>> {
        match self.entry(index)? {
            Entry::Bar(_) => Some(vec![index]),
            Entry::Loop(lp) => Some(lp.bars.clone()),
        }
    }

    /// The most recently allocated bar other than the default one.
    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars().rev().find(|b| b.index != DEFAULT_BAR)
    }

    /// Index a bar called `name` will occupy: its current index when it is
    /// being redefined, otherwise the next free one.
    pub fn reserve_bar(&self, name: &str) -> Result<usize, ParseError> {
        match self.lookup(name) {
            Some(DEFAULT_BAR) => Err(ParseError::command(
                "the default bar cannot be redefined with \\bar",
            )),
            Some(index) => match self.entry(index) {
                Some(Entry::Bar(_)) => Ok(index),
                _ => Err(ParseError::command(format!("{name} is already a loop"))),
            },
            None => Ok(self.entries.len()),
        }
    }

    /// Commit a closed bar together with its links.
    ///
    /// `bar.linked_from` and `bar.linked_to` are taken as the links the new
    /// definition wants; neighbours are updated to match and links the old
    /// definition held are dropped. Every loop containing a touched bar is
    /// re-validated and nothing changes on failure. Returns the bars that
    /// lost an incoming link.
    pub fn insert_bar(&mut self, bar: Bar) -> Result<Vec<usize>, ParseError> {
        let index = bar.index;
        if index > self.entries.len() {
            return Err(ParseError::command(format!("bar index {index} was never reserved")));
        }
        let mut work = self.clone();
        let mut touched = vec![index];
        let mut released = Vec::new();

        if let Some(old) = work.bar(index).cloned() {
            if let Some(to) = old.linked_to.filter(|&t| Some(t) != bar.linked_to) {
                if let Some(next) = work.bar_mut(to).filter(|b| b.linked_from == Some(index)) {
                    next.linked_from = None;
                    released.push(to);
                }
            }
            if let Some(from) = old.linked_from.filter(|&f| Some(f) != bar.linked_from) {
                if let Some(prev) = work.bar_mut(from).filter(|b| b.linked_to == Some(index)) {
                    prev.linked_to = None;
                }
            }
        }
        if let Some(from) = bar.linked_from {
            let Some(prev) = work.bar_mut(from) else {
                return Err(ParseError::command(format!("bar index {from} is missing")));
            };
            let replaced = prev.linked_to.filter(|&t| t != index);
            prev.linked_to = Some(index);
            if let Some(to) = replaced {
                if let Some(next) = work.bar_mut(to).filter(|b| b.linked_from == Some(from)) {
                    next.linked_from = None;
                    released.push(to);
                }
            }
            touched.push(from);
        }
        if let Some(to) = bar.linked_to {
            let Some(next) = work.bar_mut(to) else {
                return Err(ParseError::command(format!("bar index {to} is missing")));
            };
            let replaced = next.linked_from.filter(|&f| f != index);
            next.linked_from = Some(index);
            if let Some(from) = replaced {
                if let Some(prev) = work.bar_mut(from).filter(|b| b.linked_to == Some(to)) {
                    prev.linked_to = None;
                }
            }
            touched.push(to);
        }

        if index == work.entries.len() {
            work.names.insert(bar.name.clone(), index);
            work.entries.push(Some(Entry::Bar(bar)));
        } else {
            work.entries[index] = Some(Entry::Bar(bar));
        }
        for lp in work.loops().filter(|lp| touched.iter().any(|t| lp.bars.contains(t))) {
            work.validate_sequence(&lp.bars, &lp.name)?;
        }
        *self = work;
        Ok(released)
    }

    /// Build and commit a loop from bar/loop references.
    pub fn new_loop(&mut self, name: &str, refs: &[String]) -> Result<usize, ParseError> {
        let bars = self.resolve_refs(refs)?;
        self.validate_sequence(&bars, name)?;
        let index = match self.lookup(name) {
            Some(index) if self.get_loop(index).is_some() => index,
            Some(_) => return Err(ParseError::command(format!("{name} is already a bar"))),
            None => self.entries.len(),
        };
        let lp = Loop {
            index,
            name: name.to_string(),
            bars,
        };
        if index == self.entries.len() {
            self.entries.push(Some(Entry::Loop(lp)));
            self.names.insert(name.to_string(), index);
        } else {
            self.entries[index] = Some(Entry::Loop(lp));
        }
        Ok(index)
    }

    /// Expand references: names, `name*count` and wildcard patterns.
    pub fn resolve_refs(&self, refs: &[String]) -> Result<Vec<usize>, ParseError> {
        let mut out = Vec::new();
        for r in refs {
            if let Some((name, count)) = split_count(r) {
                let seq = self.named_sequence(name)?;
                for _ in 0..count {
                    out.extend_from_slice(&seq);
                }
            } else if r.contains(['*', '?']) {
                let matched = self.match_wildcard(r)?;
                if matched.is_empty() {
                    return Err(ParseError::command(format!("no bar matches '{r}'")));
                }
                out.extend(matched);
            } else {
                out.extend(self.named_sequence(r)?);
            }
        }
        if out.is_empty() {
            return Err(ParseError::command("a loop needs at least one bar"));
        }
        Ok(out)
    }

    fn named_sequence(&self, name: &str) -> Result<Vec<usize>, ParseError> {
        self.lookup(name)
            .and_then(|index| self.sequence(index))
            .ok_or_else(|| ParseError::command(format!("no bar or loop named {name}")))
    }

    fn match_wildcard(&self, pattern: &str) -> Result<Vec<usize>, ParseError> {
        let mut re = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');
        let re = Regex::new(&re)
            .map_err(|e| ParseError::command(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(self
            .bars()
            .filter(|b| b.index != DEFAULT_BAR && re.is_match(&b.name))
            .map(|b| b.index)
            .collect())
    }

    /// Linked bars must be adjacent, cyclically, in `bars`.
    pub fn validate_sequence(&self, bars: &[usize], loop_name: &str) -> Result<(), ParseError> {
        let n = bars.len();
        for (pos, &index) in bars.iter().enumerate() {
            let Some(bar) = self.bar(index) else {
                return Err(ParseError::command(format!("loop {loop_name} refers to a missing bar")));
            };
            let next = bars[(pos + 1) % n];
            let prev = bars[(pos + n - 1) % n];
            if let Some(to) = bar.linked_to {
                if next != to {
                    return Err(ParseError::linkage(format!(
                        "bar {} is linked to bar {} but is followed by bar {} in {loop_name}",
                        bar.name,
                        self.display_name(to),
                        self.display_name(next)
                    )));
                }
            }
            if let Some(from) = bar.linked_from {
                if prev != from {
                    return Err(ParseError::linkage(format!(
                        "bar {} is linked from bar {} but follows bar {} in {loop_name}",
                        bar.name,
                        self.display_name(from),
                        self.display_name(prev)
                    )));
                }
            }
        }
        Ok(())
    }

    fn display_name(&self, index: usize) -> String {
        self.entry(index)
            .map(|e| e.name().to_string())
            .unwrap_or_else(|| index.to_string())
    }

    /// Loops that contain the bar at `index`.
    pub fn loops_containing(&self, index: usize) -> Vec<&Loop> {
        self.loops().filter(|lp| lp.bars.contains(&index)).collect()
    }

    /// Delete a bar or loop by name. Bars still used by a loop stay.
    pub fn remove(&mut self, name: &str) -> Result<usize, ParseError> {
        let index = self
            .lookup(name)
            .ok_or_else(|| ParseError::command(format!("no bar or loop named {name}")))?;
        if index == DEFAULT_BAR {
            return Err(ParseError::command("the default bar cannot be deleted"));
        }
        if let Some(lp) = self.loops_containing(index).first() {
            return Err(ParseError::command(format!(
                "bar {name} is used by loop {}",
                lp.name
            )));
        }
        if self.bars().any(|b| b.linked_to == Some(index) || b.linked_from == Some(index)) {
            return Err(ParseError::command(format!("bar {name} is linked to another bar")));
        }
        self.entries[index] = None;
        self.names.remove(name);
        Ok(index)
    }
}

/// Split `name*count`.
fn split_count(r: &str) -> Option<(&str, usize)> {
    let (name, count) = r.rsplit_once('*')?;
    if name.is_empty() || count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    count.parse().ok().filter(|&c| c > 0).map(|c| (name, c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::bar::{Meter, Tempo};

    fn refs(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn add_bar(graph: &mut BarGraph, name: &str) -> usize {
        let index = graph.reserve_bar(name).unwrap();
        graph
            .insert_bar(Bar::new(index, name, Meter::COMMON, Tempo::default()))
            .unwrap();
        index
    }

    #[test]
    fn default_bar_exists() {
        let graph = BarGraph::new();
        assert_eq!(graph.lookup("default"), Some(DEFAULT_BAR));
        assert_eq!(graph.sequence(DEFAULT_BAR), Some(vec![0]));
        assert!(graph.reserve_bar("default").is_err());
    }

    #[test]
    fn bars_and_loops_share_indices() {
        let mut graph = BarGraph::new();
        let a = add_bar(&mut graph, "a");
        let b = add_bar(&mut graph, "b");
        let lp = graph.new_loop("ab", &refs("a b a")).unwrap();
        assert_eq!((a, b, lp), (1, 2, 3));
        assert_eq!(graph.sequence(lp), Some(vec![1, 2, 1]));
        assert_eq!(graph.reserve_bar("a").unwrap(), 1);
        assert!(graph.reserve_bar("ab").is_err());
    }

    #[test]
    fn counts_and_nested_loops() {
        let mut graph = BarGraph::new();
        add_bar(&mut graph, "a");
        add_bar(&mut graph, "b");
        graph.new_loop("ab", &refs("a b")).unwrap();
        let big = graph.new_loop("big", &refs("ab*2 a*3")).unwrap();
        assert_eq!(graph.sequence(big), Some(vec![1, 2, 1, 2, 1, 1, 1]));
    }

    #[test]
    fn wildcards_match_bar_names() {
        let mut graph = BarGraph::new();
        add_bar(&mut graph, "verse1");
        add_bar(&mut graph, "chorus");
        add_bar(&mut graph, "verse2");
        let lp = graph.new_loop("v", &refs("verse*")).unwrap();
        assert_eq!(graph.sequence(lp), Some(vec![1, 3]));
        assert!(graph.new_loop("x", &refs("bridge*")).is_err());
    }

    #[test]
    fn unknown_reference() {
        let mut graph = BarGraph::new();
        let err = graph.new_loop("x", &refs("nope")).unwrap_err();
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn linked_bars_must_be_adjacent() {
        let mut graph = BarGraph::new();
        let a = add_bar(&mut graph, "a");
        let b = add_bar(&mut graph, "b");
        add_bar(&mut graph, "c");
        graph.bar_mut(a).unwrap().linked_to = Some(b);
        graph.bar_mut(b).unwrap().linked_from = Some(a);

        assert!(graph.new_loop("ok", &refs("a b c")).is_ok());
        let err = graph.new_loop("bad", &refs("a c b")).unwrap_err();
        assert!(err.message.contains("bar a") && err.message.contains("bar b"));
        // cyclic: b follows a when the loop wraps
        assert!(graph.new_loop("wrap", &refs("b c a")).is_ok());
        assert!(graph.validate_sequence(&[a], "a").is_err());
    }

    #[test]
    fn redefinition_revalidates_loops() {
        let mut graph = BarGraph::new();
        let a = add_bar(&mut graph, "a");
        add_bar(&mut graph, "b");
        add_bar(&mut graph, "c");
        graph.new_loop("ac", &refs("a c")).unwrap();

        let mut linked = Bar::new(a, "a", Meter::COMMON, Tempo::default());
        linked.linked_to = Some(2);
        assert!(graph.insert_bar(linked).is_err());
        assert_eq!(graph.bar(a).unwrap().linked_to, None);
        assert_eq!(graph.bar(2).unwrap().linked_from, None);
    }

    #[test]
    fn linking_into_a_new_bar_revalidates_loops_of_the_source() {
        let mut graph = BarGraph::new();
        let a = add_bar(&mut graph, "a");
        graph.new_loop("l", &refs("a")).unwrap();

        let b = graph.reserve_bar("b").unwrap();
        let mut linked = Bar::new(b, "b", Meter::COMMON, Tempo::default());
        linked.linked_from = Some(a);
        let err = graph.insert_bar(linked).unwrap_err();
        assert!(err.message.contains("bar a") && err.message.contains("bar b"), "{}", err.message);
        assert!(graph.lookup("b").is_none());
        assert_eq!(graph.bar(a).unwrap().linked_to, None);
    }

    #[test]
    fn redefinition_drops_stale_links() {
        let mut graph = BarGraph::new();
        let a = add_bar(&mut graph, "a");
        let b = graph.reserve_bar("b").unwrap();
        let mut linked = Bar::new(b, "b", Meter::COMMON, Tempo::default());
        linked.linked_from = Some(a);
        assert_eq!(graph.insert_bar(linked).unwrap(), Vec::<usize>::new());
        assert_eq!(graph.bar(a).unwrap().linked_to, Some(b));

        // a no longer ties over
        let released = graph
            .insert_bar(Bar::new(a, "a", Meter::COMMON, Tempo::default()))
            .unwrap();
        assert_eq!(released, vec![b]);
        assert_eq!(graph.bar(b).unwrap().linked_from, None);
        assert!(graph.new_loop("l", &refs("b")).is_ok());
        assert!(graph.remove("a").is_ok());
    }

    #[test]
    fn redefinition_keeps_links_it_asks_for() {
        let mut graph = BarGraph::new();
        let a = add_bar(&mut graph, "a");
        let b = graph.reserve_bar("b").unwrap();
        let mut linked = Bar::new(b, "b", Meter::COMMON, Tempo::default());
        linked.linked_from = Some(a);
        graph.insert_bar(linked).unwrap();
        graph.new_loop("ab", &refs("a b")).unwrap();

        let mut again = Bar::new(a, "a", Meter::COMMON, Tempo::default());
        again.linked_to = Some(b);
        assert!(graph.insert_bar(again).unwrap().is_empty());
        assert_eq!(graph.bar(b).unwrap().linked_from, Some(a));
    }

    #[test]
    fn removal_rules() {
        let mut graph = BarGraph::new();
        add_bar(&mut graph, "a");
        add_bar(&mut graph, "b");
        graph.new_loop("l", &refs("a")).unwrap();
        assert!(graph.remove("a").is_err());
        assert!(graph.remove("default").is_err());
        assert_eq!(graph.remove("b").unwrap(), 2);
        assert!(graph.lookup("b").is_none());
        assert!(graph.remove("l").is_ok());
        assert!(graph.remove("a").is_ok());
    }
}
