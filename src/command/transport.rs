//! Playback control: play, stop, finish, goto, mute and solo, MIDI clock,
//! frame bindings.

use crate::dsl::error::ParseError;
use crate::scheduler::SchedulerCommand;
use crate::score::Symbol;
use crate::session::Session;

use super::{parse_number, parse_switch, CommandInput, CommandOutput};

/// `\play` starts the cued loop; `\play name` cues `name` first.
pub fn play(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    match input.arg(0) {
        Some(name) => {
            let index = s
                .score
                .graph
                .lookup(name)
                .ok_or_else(|| ParseError::command(format!("no bar or loop named {name}")))?;
            start(s, index)?;
            Ok(CommandOutput::done(1))
        }
        None => {
            let cue = s.cue;
            start(s, cue)?;
            Ok(CommandOutput::done(0))
        }
    }
}

/// Cue `index` and start playing it; while playing it is swapped in at the
/// next bar start.
pub(crate) fn start(s: &mut Session, index: usize) -> Result<(), ParseError> {
    if s.score.graph.sequence(index).map_or(true, |seq| seq.is_empty()) {
        return Err(ParseError::command("nothing to play"));
    }
    s.cue = index;
    s.send(SchedulerCommand::Play(Some(index)))?;
    tracing::info!(index, "play");
    Ok(())
}

pub fn stop(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    s.send(SchedulerCommand::Stop)?;
    tracing::info!("stop at next bar");
    Ok(CommandOutput::done(0))
}

pub fn stop_now(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    s.stop_now();
    tracing::info!("stopped");
    Ok(CommandOutput::done(0))
}

pub fn finish(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    s.send(SchedulerCommand::Finish)?;
    Ok(CommandOutput::done(0))
}

/// `\countdown n` counts `n` beats in before playing; 0 disables it.
pub fn countdown(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let beats: u32 = parse_number(input, input.arg(0), 0..=64)?;
    s.send(SchedulerCommand::SetCountdown(beats))?;
    Ok(CommandOutput::done(1))
}

/// `\goto n` jumps to the n-th bar (from 1) of the loop at the next bar start.
pub fn goto(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let loop_index = s.playing.map_or(s.cue, |(index, _)| index);
    let len = s.score.graph.sequence(loop_index).map_or(0, |seq| seq.len());
    if len == 0 {
        return Err(ParseError::command("no loop to jump in"));
    }
    let position: usize = parse_number(input, input.arg(0), 1..=len)?;
    s.send(SchedulerCommand::Goto(position - 1))?;
    Ok(CommandOutput::done(1))
}

/// Instrument ids named by instrument or group names.
fn targets(s: &Session, names: &[String]) -> Result<Vec<usize>, ParseError> {
    let mut ids = Vec::new();
    for name in names {
        match s.score.resolve(name) {
            Some(Symbol::Instrument(id)) => ids.push(id),
            Some(Symbol::Group) => ids.extend(s.score.groups[name.as_str()].iter().copied()),
            _ => return Err(ParseError::command(format!("no instrument or group named {name}"))),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

fn set_mute(s: &mut Session, input: &CommandInput, muted: bool, now: bool) -> Result<CommandOutput, ParseError> {
    let (names, used) = input.words();
    if names.is_empty() {
        return Err(ParseError::command(format!("\\{} needs instrument names", input.name)));
    }
    for id in targets(s, &names)? {
        if let Some(inst) = s.score.instrument_mut(id) {
            inst.muted = muted;
        }
        s.send(SchedulerCommand::Mute {
            instrument: id,
            muted,
            now,
        })?;
    }
    Ok(CommandOutput::done(used))
}

fn set_solo(s: &mut Session, input: &CommandInput, solo: bool, now: bool) -> Result<CommandOutput, ParseError> {
    let (names, used) = input.words();
    if names.is_empty() {
        return Err(ParseError::command(format!("\\{} needs instrument names", input.name)));
    }
    for id in targets(s, &names)? {
        if let Some(inst) = s.score.instrument_mut(id) {
            inst.solo = solo;
        }
        s.send(SchedulerCommand::Solo {
            instrument: id,
            solo,
            now,
        })?;
    }
    Ok(CommandOutput::done(used))
}

pub fn mute(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_mute(s, input, true, false)
}

pub fn unmute(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_mute(s, input, false, false)
}

pub fn mute_now(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_mute(s, input, true, true)
}

pub fn unmute_now(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_mute(s, input, false, true)
}

pub fn solo(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_solo(s, input, true, false)
}

pub fn unsolo(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_solo(s, input, false, false)
}

pub fn solo_now(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_solo(s, input, true, true)
}

pub fn unsolo_now(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    set_solo(s, input, false, true)
}

/// `\midiclock on|off`, `\midiclock.ppqn n`.
pub fn midiclock(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    match input.sub() {
        None => {
            let on = parse_switch(input, input.arg(0))?;
            s.midi_clock = on;
            s.send(SchedulerCommand::MidiClock(on))?;
        }
        Some("ppqn") => {
            let ppqn: u32 = parse_number(input, input.arg(0), 1..=960)?;
            s.send(SchedulerCommand::MidiClockPpqn(ppqn))?;
        }
        Some(other) => {
            return Err(ParseError::command(format!("unknown subcommand midiclock.{other}")));
        }
    }
    Ok(CommandOutput::done(1))
}

/// `\framerate ms` sets the interval of framerate bindings; 0 turns them off.
pub fn framerate(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let ms: u32 = parse_number(input, input.arg(0), 0..=10_000)?;
    s.send(SchedulerCommand::FrameInterval(ms))?;
    Ok(CommandOutput::done(1))
}

pub fn unbind_all(s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    for function in s.score.functions.values_mut() {
        function.binding = None;
    }
    s.send(SchedulerCommand::UnbindAll)?;
    Ok(CommandOutput::done(0))
}
