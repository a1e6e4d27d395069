//! Commands named after score symbols: instruments, bars and loops,
//! functions, lists, remote clients and groups.

use crate::dsl::error::ParseError;
use crate::dsl::expand::brace_group;
use crate::dsl::token::tokenize;
use crate::scheduler::SchedulerCommand;
use crate::score::{BindTarget, Binding, Clef, Route};
use crate::session::Session;
use crate::sink::{Notification, SinkKey};

use super::{parse_number, parse_switch, transport, CommandInput, CommandOutput};

fn unknown_sub(input: &CommandInput) -> ParseError {
    ParseError::command(format!(
        "\\{} has no subcommand {}",
        input.base,
        input.sub().unwrap_or_default()
    ))
}

/// `\inst notes...` compiles a melodic line; `\inst.setting value` changes
/// the instrument.
pub fn instrument(s: &mut Session, input: &CommandInput, id: usize) -> Result<CommandOutput, ParseError> {
    let Some(sub) = input.sub() else {
        if input.args.is_empty() {
            return Err(ParseError::command(format!("\\{} needs a melodic line", input.name)));
        }
        s.compile_instrument_line(id, &input.args)?;
        return Ok(CommandOutput::done(input.args.len()));
    };

    let value = input.arg(0);
    let mut republish = true;
    match sub {
        "transpose" => {
            let semitones: i32 = parse_number(input, value, -48..=48)?;
            instrument_mut(s, id)?.transpose = semitones;
            republish = false;
        }
        "midiport" => {
            let port: usize = parse_number(input, value, 0..=255)?;
            instrument_mut(s, id)?.set_midi_port(port);
        }
        "midichan" => {
            let channel: u32 = parse_number(input, value, 1..=16)?;
            instrument_mut(s, id)?.set_midi_channel(channel)?;
        }
        "rhythm" => {
            let on = parse_switch(input, value)?;
            instrument_mut(s, id)?.rhythm_only = on;
            republish = false;
        }
        "clef" => {
            let name = value.ok_or_else(|| ParseError::command("\\clef needs a clef name"))?;
            let clef = Clef::parse(name).ok_or_else(|| ParseError::command(format!("unknown clef {name}")))?;
            instrument_mut(s, id)?.clef = clef;
            s.notify(Notification::Clef {
                instrument: id,
                clef: clef.code(),
            });
            republish = false;
        }
        "sendto" => {
            let client = value.ok_or_else(|| ParseError::command("\\sendto needs a client name"))?;
            if !s.score.clients.contains_key(client) {
                return Err(ParseError::command(format!("no client named {client}")));
            }
            instrument_mut(s, id)?.route = Route::Remote(client.to_string());
        }
        "delay" => {
            let ms: u32 = parse_number(input, value, 0..=10_000)?;
            let inst = instrument_mut(s, id)?;
            inst.delay_ms = ms;
            let key = match &inst.route {
                Route::Midi { port, .. } => Some(SinkKey::Midi(*port)),
                Route::Remote(client) => Some(SinkKey::Remote(client.clone())),
                Route::Engine(handle) => Some(SinkKey::Engine(*handle)),
                Route::None => None,
            };
            if let Some(key) = key {
                s.send(SchedulerCommand::SetDelay { key, delay_ms: ms })?;
            }
            republish = false;
        }
        "engine" => {
            let handle: u32 = parse_number(input, value, 0..=1024)?;
            instrument_mut(s, id)?.route = Route::Engine(handle);
        }
        _ => return Err(unknown_sub(input)),
    }
    if republish {
        s.publish()?;
    }
    Ok(CommandOutput::done(1))
}

fn instrument_mut(s: &mut Session, id: usize) -> Result<&mut crate::score::Instrument, ParseError> {
    s.score
        .instrument_mut(id)
        .ok_or_else(|| ParseError::command(format!("instrument {id} no longer exists")))
}

/// `\name` for a bar or loop plays it, as `\play name` would.
pub fn bar_or_loop(s: &mut Session, input: &CommandInput, index: usize) -> Result<CommandOutput, ParseError> {
    if input.sub.is_some() {
        return Err(unknown_sub(input));
    }
    transport::start(s, index)?;
    Ok(CommandOutput::done(0))
}

/// `\f` or `\f { args }` calls a function; subcommands manage its binding.
pub fn function(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = input.base.as_str();
    let Some(sub) = input.sub() else {
        let (args, used) = brace_group(&input.rest, 0).unwrap_or_default();
        let out = s.call_function(name, &args)?;
        return Ok(CommandOutput {
            consumed: used,
            ..out
        });
    };

    match sub {
        "bind" => {
            let target = input
                .arg(0)
                .ok_or_else(|| ParseError::command(format!("\\{name}.bind needs a target")))?;
            let target = match BindTarget::parse_keyword(target) {
                Some(t) => t,
                None => BindTarget::Instrument(s.score.instrument_id(target).ok_or_else(|| {
                    ParseError::command(format!(
                        "bind target must be an instrument, beat, bar, loop, framerate or finish, not {target}"
                    ))
                })?),
            };
            let mut binding = Binding::new(target);
            binding.chained = function_ref(s, name)?.on_unbind.clone();
            install_binding(s, name, binding)?;
            Ok(CommandOutput::done(1))
        }
        "unbind" => {
            function_mut(s, name)?.binding = None;
            s.send(SchedulerCommand::Unbind(name.to_string()))?;
            Ok(CommandOutput::done(0))
        }
        "setstep" => {
            let step: usize = parse_number(input, input.arg(0), 1..=4096)?;
            let increment: usize = match input.arg(1) {
                Some(v) => parse_number(input, Some(v), 0..=4096)?,
                None => 0,
            };
            let mut binding = bound(s, name)?;
            if !matches!(binding.target, BindTarget::Instrument(_)) {
                return Err(ParseError::command(format!(
                    "{name} is not bound to an instrument"
                )));
            }
            binding.step = step - 1;
            binding.increment = increment;
            install_binding(s, name, binding)?;
            Ok(CommandOutput::done(if input.arg(1).is_some() { 2 } else { 1 }))
        }
        "repeat" => {
            let count: u32 = parse_number(input, input.arg(0), 1..=100_000)?;
            let mut binding = bound(s, name)?;
            binding.repeat = Some(count);
            install_binding(s, name, binding)?;
            Ok(CommandOutput::done(1))
        }
        "onunbind" => {
            let next = input
                .arg(0)
                .ok_or_else(|| ParseError::command(format!("\\{name}.onunbind needs a function")))?;
            if !s.score.functions.contains_key(next) {
                return Err(ParseError::command(format!("no function named {next}")));
            }
            let function = function_mut(s, name)?;
            function.on_unbind = Some(next.to_string());
            if let Some(mut binding) = function.binding.clone() {
                binding.chained = Some(next.to_string());
                install_binding(s, name, binding)?;
            }
            Ok(CommandOutput::done(1))
        }
        "print" => {
            let function = function_ref(s, name)?;
            let mut lines = function.body.clone();
            if let Some(binding) = &function.binding {
                lines.push(format!(
                    "bound to {:?} step {} increment {} repeat {}",
                    binding.target,
                    binding.step + 1,
                    binding.increment,
                    binding
                        .repeat
                        .map_or_else(|| "forever".to_string(), |n| n.to_string())
                ));
            }
            Ok(CommandOutput::note(0, lines.join("\n")))
        }
        _ => Err(unknown_sub(input)),
    }
}

fn function_ref<'a>(s: &'a Session, name: &str) -> Result<&'a crate::score::Function, ParseError> {
    s.score
        .functions
        .get(name)
        .ok_or_else(|| ParseError::command(format!("no function named {name}")))
}

fn function_mut<'a>(s: &'a mut Session, name: &str) -> Result<&'a mut crate::score::Function, ParseError> {
    s.score
        .functions
        .get_mut(name)
        .ok_or_else(|| ParseError::command(format!("no function named {name}")))
}

fn bound(s: &Session, name: &str) -> Result<Binding, ParseError> {
    function_ref(s, name)?
        .binding
        .clone()
        .ok_or_else(|| ParseError::command(format!("{name} is not bound")))
}

fn install_binding(s: &mut Session, name: &str, binding: Binding) -> Result<(), ParseError> {
    function_mut(s, name)?.binding = Some(binding.clone());
    s.send(SchedulerCommand::Bind {
        function: name.to_string(),
        binding,
    })
}

/// `\list` prints it, `\list.size` counts it and `\list.traverse { template }`
/// runs the template once per element with `$1` replaced.
pub fn list(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let list = s
        .score
        .lists
        .get(&input.base)
        .ok_or_else(|| ParseError::command(format!("no list named {}", input.base)))?;
    match input.sub() {
        None => Ok(CommandOutput::note(0, list.items.join(" "))),
        Some("size") => Ok(CommandOutput::note(0, list.len().to_string())),
        Some("traverse") => {
            let (template, used) = input.words();
            if template.is_empty() {
                return Err(ParseError::command(format!(
                    "\\{}.traverse needs a template",
                    input.base
                )));
            }
            let lines = list.traverse(&template.join(" "));
            let mut summary = CommandOutput::done(used);
            for line in lines {
                let out = s.run_tokens(tokenize(&line)?)?;
                summary.absorb(out);
            }
            Ok(summary)
        }
        Some(_) => Err(unknown_sub(input)),
    }
}

/// `\client /address args...` sends a raw message; `.insts` routes
/// instruments to the client and `.delay` sets its send delay.
pub fn client(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = input.base.clone();
    let key = SinkKey::Remote(name.clone());
    match input.sub() {
        None => {
            let addr = input
                .arg(0)
                .filter(|a| a.starts_with('/'))
                .ok_or_else(|| ParseError::command(format!("\\{name} needs an /address")))?;
            s.send(SchedulerCommand::SendRaw {
                key,
                addr: addr.to_string(),
                args: input.args[1..].to_vec(),
            })?;
            Ok(CommandOutput::done(input.args.len()))
        }
        Some("insts") => {
            let (names, used) = input.words();
            let ids = s.score.instrument_ids(&names)?;
            for id in ids {
                instrument_mut(s, id)?.route = Route::Remote(name.clone());
            }
            s.publish()?;
            Ok(CommandOutput::done(used))
        }
        Some("delay") => {
            let ms: u32 = parse_number(input, input.arg(0), 0..=10_000)?;
            if let Some(info) = s.score.clients.get_mut(&name) {
                info.delay_ms = ms;
            }
            s.send(SchedulerCommand::SetDelay { key, delay_ms: ms })?;
            Ok(CommandOutput::done(1))
        }
        Some(_) => Err(unknown_sub(input)),
    }
}

/// `\group notes...` gives every member the same line; `.add` and `.remove`
/// edit the membership.
pub fn group(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let name = input.base.clone();
    let members = s
        .score
        .groups
        .get(&name)
        .cloned()
        .ok_or_else(|| ParseError::command(format!("no group named {name}")))?;
    match input.sub() {
        None => {
            if input.args.is_empty() {
                return Err(ParseError::command(format!("\\{name} needs a melodic line")));
            }
            let mut tokens = Vec::with_capacity(members.len() * (input.args.len() + 1));
            for id in members {
                if let Some(inst) = s.score.instrument(id) {
                    tokens.push(format!("\\{}", inst.name));
                    tokens.extend(input.args.iter().cloned());
                }
            }
            Ok(CommandOutput::rewrite(input.args.len(), tokens))
        }
        Some(op @ ("add" | "remove")) => {
            let (names, used) = input.words();
            let ids = s.score.instrument_ids(&names)?;
            let group = s.score.groups.entry(name.clone()).or_default();
            if op == "add" {
                for id in ids {
                    if !group.contains(&id) {
                        group.push(id);
                    }
                }
            } else {
                group.retain(|m| !ids.contains(m));
            }
            let members: Vec<String> = group
                .clone()
                .into_iter()
                .filter_map(|id| s.score.instrument(id).map(|i| i.name.clone()))
                .collect();
            s.notify(Notification::GroupChanged { name, members });
            Ok(CommandOutput::done(used))
        }
        Some(_) => Err(unknown_sub(input)),
    }
}

#[cfg(test)]
mod tests {
    use crate::dsl::error::Severity;
    use crate::score::{BindTarget, Route};
    use crate::session::{Session, SessionConfig};

    fn session() -> Session {
        let mut s = Session::new(SessionConfig::default());
        run(&mut s, "\\insts vln vla");
        s
    }

    fn run(s: &mut Session, line: &str) -> String {
        let r = s.parse_line(line, 0);
        assert!(r.severity < Severity::Error, "{line}: {}", r.message);
        r.message
    }

    fn fails(s: &mut Session, line: &str) -> String {
        let r = s.parse_line(line, 0);
        assert_eq!(r.severity, Severity::Error, "{line} should fail");
        r.message
    }

    #[test]
    fn instrument_settings() {
        let mut s = session();
        run(&mut s, "\\vln.transpose -2");
        run(&mut s, "\\vln.midichan 10");
        let vln = s.score().instrument_id("vln").unwrap();
        let inst = s.score().instrument(vln).unwrap();
        assert_eq!(inst.transpose, -2);
        assert_eq!(inst.route, Route::Midi { port: 0, channel: 9 });
        fails(&mut s, "\\vln.midichan 17");
        fails(&mut s, "\\vln.clef soprano");
        fails(&mut s, "\\vln.sendto nowhere");
        fails(&mut s, "\\vln.volume 3");
    }

    #[test]
    fn transposition_applies_to_new_lines() {
        let mut s = session();
        run(&mut s, "\\vln.transpose 12");
        run(&mut s, "\\bar a { \\vln c'1 }");
        let vln = s.score().instrument_id("vln").unwrap();
        let a = s.score().graph.lookup("a").unwrap();
        let events = s.score().instrument(vln).unwrap().events(a).unwrap();
        assert_eq!(events.steps[0].midi, vec![72.0]);
    }

    #[test]
    fn group_lines_go_to_every_member() {
        let mut s = session();
        run(&mut s, "\\group strings vln vla");
        run(&mut s, "\\bar a { \\strings c'2 d'2 }");
        let a = s.score().graph.lookup("a").unwrap();
        for inst in s.score().live_instruments() {
            assert!(!inst.events(a).unwrap().is_silent(), "{}", inst.name);
        }
        run(&mut s, "\\strings.remove vla");
        assert_eq!(s.score().groups["strings"].len(), 1);
    }

    #[test]
    fn function_binding_lifecycle() {
        let mut s = session();
        run(&mut s, "\\function tick { \\print tick }");
        fails(&mut s, "\\tick.repeat 3");
        run(&mut s, "\\tick.bind vla");
        run(&mut s, "\\tick.setstep 2 1");
        run(&mut s, "\\tick.repeat 3");
        let binding = s.score().functions["tick"].binding.clone().unwrap();
        let vla = s.score().instrument_id("vla").unwrap();
        assert_eq!(binding.target, BindTarget::Instrument(vla));
        assert_eq!((binding.step, binding.increment, binding.repeat), (1, 1, Some(3)));
        run(&mut s, "\\tick.unbind");
        assert!(s.score().functions["tick"].binding.is_none());
        fails(&mut s, "\\tick.bind somewhere");
    }

    #[test]
    fn function_arguments() {
        let mut s = session();
        run(&mut s, "\\function line { \\bar $1 { \\vln $2 } }");
        run(&mut s, "\\line { intro c'1 }");
        assert!(s.score().graph.lookup("intro").is_some());
        let msg = fails(&mut s, "\\line { only }");
        assert!(msg.contains("needs 2 arguments"), "{msg}");
    }

    #[test]
    fn lists_print_count_and_traverse() {
        let mut s = session();
        run(&mut s, "\\list notes { c'2 d'2 }");
        assert_eq!(run(&mut s, "\\notes"), "c'2 d'2");
        assert_eq!(run(&mut s, "\\notes.size"), "2");
        run(&mut s, "\\bar a {");
        run(&mut s, "\\notes.traverse { \\print $1 }");
        run(&mut s, "\\vln \\notes 1 \\notes 2");
        run(&mut s, "}");
        let vln = s.score().instrument_id("vln").unwrap();
        let a = s.score().graph.lookup("a").unwrap();
        assert_eq!(s.score().instrument(vln).unwrap().events(a).unwrap().steps.len(), 2);
    }

    #[test]
    fn client_raw_messages_need_an_address() {
        let mut s = session();
        run(&mut s, "\\osc screen 9000");
        run(&mut s, "\\screen /hello 1 2");
        fails(&mut s, "\\screen hello");
        run(&mut s, "\\screen.insts vln");
        let vln = s.score().instrument_id("vln").unwrap();
        assert_eq!(
            s.score().instrument(vln).unwrap().route,
            Route::Remote("screen".into())
        );
    }
}
