//! Commands that define or remove score symbols.

use crate::dsl::error::ParseError;
use crate::dsl::expand::brace_group;
use crate::scheduler::SchedulerCommand;
use crate::score::{Function, List, Meter, Route, Symbol, Tempo, DEFAULT_BAR};
use crate::session::{FunctionDraft, Session};
use crate::sink::{Notification, SinkKey};

use super::{CommandInput, CommandOutput};

fn name_arg<'a>(input: &'a CommandInput, what: &str) -> Result<&'a str, ParseError> {
    input
        .arg(0)
        .filter(|a| *a != "{" && *a != "}")
        .ok_or_else(|| ParseError::command(format!("\\{} needs a {what} name", input.name)))
}

/// `\bar name {` opens a bar; the matching `}` closes it.
pub fn bar(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = name_arg(input, "bar")?;
    if input.rest.get(1).map(String::as_str) != Some("{") {
        return Err(ParseError::command(format!("\\bar {name} must be followed by {{")));
    }
    s.open_bar_named(name)?;
    Ok(CommandOutput::done(2))
}

pub fn close(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    s.close_bar()
}

/// `\loop name { refs }` or `\loop name ref ref ...`
pub fn loop_(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = name_arg(input, "loop")?;
    if let Some(staged) = &s.staging {
        return Err(ParseError::command(format!(
            "cannot define a loop while bar {} is open",
            staged.bar.name
        )));
    }
    let (refs, used) = input.words_after_first();
    if s.score.graph.lookup(name).is_none() {
        s.score.check_new_name(name)?;
    }
    let index = s.score.graph.new_loop(name, &refs)?;
    let len = s.score.graph.sequence(index).map_or(0, |seq| seq.len());
    s.cue = index;
    s.publish()?;
    s.send(SchedulerCommand::Cue(index))?;
    tracing::debug!(loop_name = name, index, len, "loop defined");
    Ok(CommandOutput::note(used, format!("loop {name}: {len} bars")))
}

/// `\function name { body }` on one line, or `\function name {` followed by
/// body lines and a closing `}` line.
pub fn function(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = name_arg(input, "function")?;
    if input.rest.get(1).map(String::as_str) != Some("{") {
        return Err(ParseError::command(format!("\\function {name} needs a {{ body }}")));
    }
    if let Some((body, span)) = brace_group(&input.rest, 1) {
        let lines = if body.is_empty() {
            Vec::new()
        } else {
            vec![body.join(" ")]
        };
        store_function(s, name, lines)?;
        return Ok(CommandOutput::note(1 + span, format!("function {name} defined")));
    }
    if input.rest.len() > 2 {
        return Err(ParseError::command(format!("unbalanced braces in function {name}")));
    }
    if !input.top_level {
        return Err(ParseError::command("a function body cannot open a multi-line function"));
    }
    if !s.score.functions.contains_key(name) {
        s.score.check_new_name(name)?;
    }
    s.function_draft = Some(FunctionDraft {
        name: name.to_string(),
        body: Vec::new(),
    });
    Ok(CommandOutput::note(2, format!("defining function {name}")))
}

/// Create or redefine a function. A redefinition keeps its binding.
pub(crate) fn store_function(s: &mut Session, name: &str, body: Vec<String>) -> Result<(), ParseError> {
    if let Some(existing) = s.score.functions.get_mut(name) {
        existing.body = body;
        return Ok(());
    }
    s.score.check_new_name(name)?;
    let function = Function::new(name, body)?;
    s.score.functions.insert(name.to_string(), function);
    Ok(())
}

/// `\list name { items }` or `\list name item item ...`
pub fn list(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = name_arg(input, "list")?;
    let (items, used) = input.words_after_first();
    if !s.score.lists.contains_key(name) {
        s.score.check_new_name(name)?;
    }
    let len = items.len();
    s.score.lists.insert(name.to_string(), List::new(name, items));
    Ok(CommandOutput::note(used, format!("list {name}: {len} elements")))
}

/// `\insts a b c` creates instruments routed to MIDI port 0, one channel each.
pub fn insts(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let (names, used) = input.words();
    if names.is_empty() {
        return Err(ParseError::command("\\insts needs at least one name"));
    }
    for (i, name) in names.iter().enumerate() {
        s.score.check_new_name(name)?;
        if names[..i].contains(name) {
            return Err(ParseError::command(format!("instrument {name} listed twice")));
        }
    }
    for name in &names {
        let id = s.score.add_instrument(name)?;
        if let Some(inst) = s.score.instrument_mut(id) {
            inst.route = Route::Midi {
                port: 0,
                channel: (id % 16) as u8,
            };
        }
    }
    s.publish()?;
    Ok(CommandOutput::note(used, format!("instruments: {}", names.join(" "))))
}

/// `\delete name ...` removes instruments, bars, loops, functions, lists,
/// clients or groups.
pub fn delete(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    if let Some(staged) = &s.staging {
        return Err(ParseError::command(format!(
            "cannot delete while bar {} is open",
            staged.bar.name
        )));
    }
    let (names, used) = input.words();
    if names.is_empty() {
        return Err(ParseError::command("\\delete needs a name"));
    }
    for name in &names {
        match s.score.resolve(name) {
            Some(Symbol::Instrument(id)) => {
                s.score.remove_instrument(id);
            }
            Some(Symbol::BarOrLoop(_)) => {
                let index = s.score.graph.remove(name)?;
                for inst in s.score.live_instruments_mut() {
                    inst.bars.remove(&index);
                }
                if s.pending_link_from == Some(index) {
                    s.pending_link_from = None;
                }
                if s.cue == index {
                    s.cue = DEFAULT_BAR;
                    s.send(SchedulerCommand::Cue(DEFAULT_BAR))?;
                }
            }
            Some(Symbol::Function) => {
                s.score.functions.remove(name.as_str());
                s.send(SchedulerCommand::Unbind(name.clone()))?;
            }
            Some(Symbol::List) => {
                s.score.lists.remove(name.as_str());
            }
            Some(Symbol::Client) => {
                s.score.clients.remove(name.as_str());
                for inst in s.score.live_instruments_mut() {
                    if inst.route == Route::Remote(name.clone()) {
                        inst.route = Route::None;
                    }
                }
                s.send(SchedulerCommand::DetachSink(SinkKey::Remote(name.clone())))?;
            }
            Some(Symbol::Group) => {
                s.score.groups.remove(name.as_str());
                s.notify(Notification::GroupChanged {
                    name: name.clone(),
                    members: Vec::new(),
                });
            }
            None => return Err(ParseError::command(format!("nothing named {name}"))),
        }
        tracing::debug!(name = %name, "deleted");
    }
    s.publish()?;
    Ok(CommandOutput::note(used, format!("deleted {}", names.join(" "))))
}

/// `\group name { members }` or `\group name a b ...`
pub fn group(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = name_arg(input, "group")?;
    let (members, used) = input.words_after_first();
    if members.is_empty() {
        return Err(ParseError::command(format!("group {name} needs members")));
    }
    let ids = s.score.instrument_ids(&members)?;
    if !s.score.groups.contains_key(name) {
        s.score.check_new_name(name)?;
    }
    s.score.groups.insert(name.to_string(), ids);
    s.notify(Notification::GroupChanged {
        name: name.to_string(),
        members: members.clone(),
    });
    Ok(CommandOutput::note(used, format!("group {name}: {}", members.join(" "))))
}

pub fn ungroup(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = name_arg(input, "group")?;
    if s.score.groups.remove(name).is_none() {
        return Err(ParseError::command(format!("no group named {name}")));
    }
    s.notify(Notification::GroupChanged {
        name: name.to_string(),
        members: Vec::new(),
    });
    Ok(CommandOutput::done(1))
}

/// `\time n/d` sets the meter of the open bar and of the bars that follow.
pub fn time(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let meter = Meter::parse(&input.expect_args(1)?[0])?;
    if let Some(staged) = s.staging.as_mut() {
        if !staged.lines.is_empty() {
            return Err(ParseError::command(format!(
                "\\time must come before the first line of bar {}",
                staged.bar.name
            )));
        }
        staged.bar.meter = meter;
        staged.bar.ticks = meter.ticks();
    }
    s.meter = meter;
    s.notify(Notification::MeterChanged {
        num: meter.num,
        den: meter.den,
    });
    Ok(CommandOutput::done(1))
}

/// `\tempo 120` or `\tempo 8=140`.
pub fn tempo(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let tempo = Tempo::parse(&input.expect_args(1)?[0])?;
    if let Some(staged) = s.staging.as_mut() {
        staged.bar.tempo = tempo;
    }
    s.tempo = tempo;
    s.notify(Notification::TempoChanged {
        bpm: tempo.quarter_bpm(),
    });
    Ok(CommandOutput::done(1))
}
