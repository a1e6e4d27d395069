//! The compiler-side session: owns the score, the staging area for bars and
//! functions being typed, and the scheduler handle.
//!
//! Lines enter through [`Session::parse_line`]. Each line is tokenized,
//! expanded (inline commands are resolved against the session) and then
//! dispatched command by command. Compiled data only reaches the scheduler
//! when a bar closes, as an immutable [`PlaybackScore`] snapshot.

pub mod config;
pub mod diagnostics;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use midir::MidiOutputConnection;

use crate::command::{self, CommandOutput, Handler};
use crate::dsl::error::{ParseError, Severity};
use crate::dsl::expand::expand;
use crate::dsl::melody::{compile_line, MelodyContext};
use crate::dsl::token::tokenize;
use crate::midi::MidiSink;
use crate::osc::{OscListener, RemoteClient, RemoteInput};
use crate::scheduler::{
    PlaybackScore, Scheduler, SchedulerCommand, SchedulerEvent, StatusSnapshot,
};
use crate::score::{Bar, BarEvents, ClientInfo, Meter, Score, Tempo, DEFAULT_BAR};
use crate::sink::{Notification, Sink, SinkKey};

pub use config::{ClientConfig, ConfigError, SessionConfig};
pub use diagnostics::{Diagnostic, Diagnostics};

/// Nested function calls allowed before a call is rejected as recursive.
pub const MAX_CALL_DEPTH: usize = 16;

/// Command rewrites allowed per line.
const MAX_LINE_REWRITES: usize = 256;

/// Line index reported for lines that arrive over the network.
pub const REMOTE_LINE: usize = usize::MAX;

/// Outcome of one line, as shown to the performer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineResult {
    pub severity: Severity,
    pub message: String,
}

/// A bar between its `\bar name {` and `}`.
#[derive(Debug)]
pub(crate) struct StagedBar {
    pub bar: Bar,
    /// Compiled lines by instrument id.
    pub lines: BTreeMap<usize, BarEvents>,
    /// Set when a line of the bar failed; the bar is dropped at its `}`.
    pub failed: bool,
}

/// A function whose body is still being typed.
#[derive(Debug)]
pub(crate) struct FunctionDraft {
    pub name: String,
    pub body: Vec<String>,
}

pub struct Session {
    pub(crate) score: Score,
    pub(crate) config: SessionConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) staging: Option<StagedBar>,
    pub(crate) function_draft: Option<FunctionDraft>,
    /// Meter and tempo the next bar starts with.
    pub(crate) meter: Meter,
    pub(crate) tempo: Tempo,
    /// Bar or loop that `\play` starts.
    pub(crate) cue: usize,
    /// Loop and position last reported by the scheduler.
    pub(crate) playing: Option<(usize, usize)>,
    pub(crate) active: bool,
    pub(crate) same_octave_only: bool,
    /// Last closed bar if something in it continues into the next bar.
    pub(crate) pending_link_from: Option<usize>,
    pub(crate) call_depth: usize,
    pub(crate) midi_clock: bool,
    pub(crate) listener: Option<OscListener>,
    remote_tx: Sender<RemoteInput>,
    remote_rx: Receiver<RemoteInput>,
    /// Bound function calls waiting for the staging area to close.
    deferred_calls: VecDeque<String>,
    handlers: HashMap<&'static str, Handler>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let scheduler = Scheduler::with_capacity(
            config.engine_config(),
            config.tick_interval(),
            config.command_queue_capacity,
        );
        let tempo = Tempo::new(config.default_tempo.clamp(1.0, 1000.0));
        let mut score = Score::new();
        if let Some(bar) = score.graph.bar_mut(DEFAULT_BAR) {
            bar.tempo = tempo;
        }
        let (remote_tx, remote_rx) = mpsc::channel();
        let mut session = Self {
            score,
            same_octave_only: config.correct_on_same_octave_only,
            config,
            scheduler,
            diagnostics: Diagnostics::default(),
            staging: None,
            function_draft: None,
            meter: Meter::COMMON,
            tempo,
            cue: DEFAULT_BAR,
            playing: None,
            active: true,
            pending_link_from: None,
            call_depth: 0,
            midi_clock: false,
            listener: None,
            remote_tx,
            remote_rx,
            deferred_calls: VecDeque::new(),
            handlers: command::builtin_table(),
        };
        if let Err(e) = session.publish() {
            tracing::warn!(error = %e.message, "initial publish failed");
        }
        session
    }

    /// Open the MIDI port, remote clients and listener named in the
    /// configuration. Failures are returned as messages, not fatal.
    pub fn open_configured_outputs(&mut self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(port) = self.config.midi_port {
            if let Err(e) = self.open_midi_port(port) {
                problems.push(e.message);
            }
        }
        for client in self.config.clients.clone() {
            if let Err(e) = self.open_client(&client.name, &client.host, client.port) {
                problems.push(e.message);
            }
        }
        if let Some(port) = self.config.listen_port {
            if let Err(e) = self.listen(port) {
                problems.push(e.message);
            }
        }
        problems
    }

    /// Parse one line of notation.
    pub fn parse_line(&mut self, text: &str, line_index: usize) -> LineResult {
        let (severity, message) = match self.run_line(text) {
            Ok(out) => (out.severity, out.message),
            Err(e) => (Severity::Error, e.message),
        };
        match severity {
            Severity::Error => tracing::warn!(line = line_index, %message, "line rejected"),
            Severity::Warning => tracing::warn!(line = line_index, %message, "line accepted with warning"),
            _ => tracing::debug!(line = line_index, "line accepted"),
        }
        let line = (line_index != REMOTE_LINE).then_some(line_index);
        self.diagnostics.push(severity, line, message.clone());
        LineResult { severity, message }
    }

    /// Gate parsing: while inactive only `\active` lines are parsed.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Handle remote input and scheduler events. Call between lines.
    pub fn poll(&mut self) -> Vec<LineResult> {
        let mut results = Vec::new();

        // 1. Bound calls held back while a bar or function was open.
        while self.staging.is_none() && self.function_draft.is_none() {
            let Some(name) = self.deferred_calls.pop_front() else {
                break;
            };
            results.push(self.run_bound(&name));
        }

        // 2. Remote controllers.
        while let Ok(input) = self.remote_rx.try_recv() {
            let result = match input {
                RemoteInput::Line(text) => self.parse_line(&text, REMOTE_LINE),
                RemoteInput::Play => self.parse_line("\\play", REMOTE_LINE),
                RemoteInput::Stop => self.parse_line("\\stop", REMOTE_LINE),
            };
            results.push(result);
        }

        // 3. Scheduler reports.
        for event in self.scheduler.poll_events() {
            self.handle_event(event, &mut results);
        }
        results
    }

    fn handle_event(&mut self, event: SchedulerEvent, results: &mut Vec<LineResult>) {
        match event {
            SchedulerEvent::CallFunction(name) => self.call_or_defer(name, results),
            SchedulerEvent::FunctionUnbound { name, chained } => {
                if let Some(function) = self.score.functions.get_mut(&name) {
                    function.binding = None;
                }
                tracing::debug!(function = %name, "binding released");
                if let Some(next) = chained {
                    self.call_or_defer(next, results);
                }
            }
            SchedulerEvent::LoopChanged {
                loop_index,
                position,
            } => self.playing = Some((loop_index, position)),
            SchedulerEvent::Finished => {
                tracing::info!("performance finished");
                self.playing = None;
            }
            SchedulerEvent::Stopped => {
                tracing::info!("performance stopped");
                self.playing = None;
            }
            SchedulerEvent::Fault(message) => {
                self.diagnostics.push(Severity::Warning, None, message.clone());
                results.push(LineResult {
                    severity: Severity::Warning,
                    message,
                });
            }
        }
    }

    /// Run a bound function, or hold it back while a bar or function is open.
    fn call_or_defer(&mut self, name: String, results: &mut Vec<LineResult>) {
        if self.staging.is_some() || self.function_draft.is_some() {
            self.deferred_calls.push_back(name);
        } else {
            results.push(self.run_bound(&name));
        }
    }

    /// Silence everything now and wait for the scheduler thread to exit.
    pub fn stop_now(&mut self) {
        self.scheduler.stop_now();
        self.playing = None;
    }

    pub fn attach_sink(&mut self, key: SinkKey, sink: Box<dyn Sink>) -> Result<(), ParseError> {
        self.scheduler
            .attach_sink(key, sink)
            .map_err(|e| ParseError::command(e.to_string()))
    }

    /// The playback data as the scheduler sees it.
    pub fn snapshot(&self) -> PlaybackScore {
        PlaybackScore::from_score(&self.score)
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn status(&self) -> StatusSnapshot {
        self.scheduler.status()
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn cue(&self) -> usize {
        self.cue
    }

    /// Name of the bar currently being defined.
    pub fn open_bar(&self) -> Option<&str> {
        self.staging.as_ref().map(|s| s.bar.name.as_str())
    }

    pub(crate) fn handler(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).copied()
    }

    fn run_line(&mut self, text: &str) -> Result<CommandOutput, ParseError> {
        if let Some(draft) = self.function_draft.as_mut() {
            let line = text.trim();
            if line == "}" {
                return self.finish_function_draft();
            }
            if !line.is_empty() {
                draft.body.push(line.to_string());
            }
            return Ok(CommandOutput::done(0));
        }

        let tokens = tokenize(text);
        let closes = tokens
            .as_ref()
            .map(|t| t.iter().any(|tok| tok == "}"))
            .unwrap_or(false);

        if let Some(staged) = self.staging.as_ref().filter(|s| s.failed) {
            let name = staged.bar.name.clone();
            if closes {
                self.staging = None;
                return Ok(CommandOutput::warning(0, format!("bar {name} discarded")));
            }
            return Ok(CommandOutput::note(0, format!("skipped: bar {name} has errors")));
        }

        let result = tokens.and_then(|tokens| {
            if tokens.is_empty() {
                return Ok(CommandOutput::done(0));
            }
            if !self.active && tokens[0] != "\\active" {
                return Ok(CommandOutput::note(0, "session inactive, line ignored"));
            }
            self.run_tokens(tokens)
        });

        result.map_err(|e| {
            let Some(staged) = self.staging.as_mut() else {
                return e;
            };
            let name = staged.bar.name.clone();
            if closes {
                self.staging = None;
                tracing::info!(bar = %name, "bar discarded");
            } else {
                staged.failed = true;
            }
            e.in_bar()
        })
    }

    /// Expand and dispatch an already tokenized line.
    pub(crate) fn run_tokens(&mut self, tokens: Vec<String>) -> Result<CommandOutput, ParseError> {
        // function bodies are expanded when called, not when stored
        let tokens = if tokens.first().is_some_and(|t| t == "\\function") {
            tokens
        } else {
            expand(tokens, self)?
        };
        self.execute(tokens, self.call_depth == 0)
    }

    fn execute(&mut self, mut tokens: Vec<String>, top_level: bool) -> Result<CommandOutput, ParseError> {
        let mut summary = CommandOutput::done(0);
        let mut pos = 0;
        let mut rewrites = 0;
        while pos < tokens.len() {
            let out = command::dispatch(self, &tokens[pos..], top_level)?;
            let span = (1 + out.consumed).min(tokens.len() - pos);
            let produced = summary.absorb(out);
            if produced.is_empty() {
                pos += span;
                continue;
            }
            rewrites += 1;
            if rewrites > MAX_LINE_REWRITES {
                return Err(ParseError::expand("line keeps rewriting itself"));
            }
            tokens.splice(pos..pos + span, produced);
        }
        Ok(summary)
    }

    /// Run a function's body with `args`.
    pub(crate) fn call_function(&mut self, name: &str, args: &[String]) -> Result<CommandOutput, ParseError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(ParseError::command(format!(
                "function {name} nests deeper than {MAX_CALL_DEPTH} calls"
            )));
        }
        let lines = self
            .score
            .functions
            .get(name)
            .ok_or_else(|| ParseError::command(format!("no function named {name}")))?
            .instantiate(args)?;
        self.call_depth += 1;
        let mut summary = CommandOutput::done(0);
        let mut result = Ok(());
        for line in lines {
            match tokenize(&line).and_then(|tokens| self.run_tokens(tokens)) {
                Ok(out) => {
                    summary.absorb(out);
                }
                Err(e) => {
                    result = Err(ParseError::command(format!("in function {name}: {}", e.message)));
                    break;
                }
            }
        }
        self.call_depth -= 1;
        result.map(|()| summary)
    }

    fn run_bound(&mut self, name: &str) -> LineResult {
        let (severity, message) = match self.call_function(name, &[]) {
            Ok(out) => (out.severity, out.message),
            Err(e) => (Severity::Error, e.message),
        };
        if severity >= Severity::Warning {
            tracing::warn!(function = name, %message, "bound function reported a problem");
        }
        self.diagnostics.push(severity, None, message.clone());
        LineResult { severity, message }
    }

    fn finish_function_draft(&mut self) -> Result<CommandOutput, ParseError> {
        let Some(draft) = self.function_draft.take() else {
            return Err(ParseError::command("no function is being defined"));
        };
        let lines = draft.body.len();
        command::define::store_function(self, &draft.name, draft.body)?;
        Ok(CommandOutput::note(
            0,
            format!("function {} defined ({lines} lines)", draft.name),
        ))
    }

    /// Compile a melodic line for instrument `id` into the open bar, or into
    /// the default bar when none is open.
    pub(crate) fn compile_instrument_line(&mut self, id: usize, tokens: &[String]) -> Result<(), ParseError> {
        let inst = self
            .score
            .instrument(id)
            .ok_or_else(|| ParseError::command(format!("instrument {id} no longer exists")))?;
        let ctx = MelodyContext {
            bar_ticks: self.staging.as_ref().map(|s| s.bar.ticks),
            transpose: inst.transpose,
            rhythm_only: inst.rhythm_only,
            start_dynamic: inst.last_dynamic,
            same_octave_only: self.same_octave_only,
            slur_open: inst.slur_open,
        };
        let events = compile_line(tokens, &ctx)?;
        match self.staging.as_mut() {
            Some(staged) => {
                staged.lines.insert(id, events);
                Ok(())
            }
            None => self.store_default_bar_line(id, events),
        }
    }

    fn store_default_bar_line(&mut self, id: usize, events: BarEvents) -> Result<(), ParseError> {
        let ticks = events.ticks;
        let changed = match self.score.graph.bar_mut(DEFAULT_BAR) {
            Some(bar) => {
                let changed = bar.ticks != ticks;
                bar.ticks = ticks;
                changed
            }
            None => return Err(ParseError::command("the default bar is missing")),
        };
        if changed {
            for inst in self.score.live_instruments_mut().filter(|i| i.id != id) {
                if inst.bars.contains_key(&DEFAULT_BAR) {
                    let rest = BarEvents::rest(ticks, inst.last_dynamic);
                    inst.bars.insert(DEFAULT_BAR, Arc::new(rest));
                }
            }
        }
        let line = self.store_events(id, DEFAULT_BAR, events);
        self.publish()?;
        if let Some(n) = line {
            self.notify(n);
        }
        Ok(())
    }

    /// Put compiled events on an instrument and carry its dynamic and slur
    /// state forward. Returns the display notification for the line.
    fn store_events(&mut self, id: usize, bar: usize, events: BarEvents) -> Option<Notification> {
        let inst = self.score.instrument_mut(id)?;
        inst.last_dynamic = events.end_dynamic;
        inst.slur_open = events.slur_open;
        let text = events.to_source();
        inst.bars.insert(bar, Arc::new(events));
        Some(Notification::Line {
            instrument: id,
            name: inst.name.clone(),
            bar,
            text,
        })
    }

    /// Open a bar; lines until the matching `}` are staged.
    pub(crate) fn open_bar_named(&mut self, name: &str) -> Result<(), ParseError> {
        if let Some(staged) = &self.staging {
            return Err(ParseError::command(format!(
                "bar {} is still open",
                staged.bar.name
            )));
        }
        if self.score.graph.lookup(name).is_none() {
            self.score.check_new_name(name)?;
        }
        let index = self.score.graph.reserve_bar(name)?;
        let bar = Bar::new(index, name, self.meter, self.tempo);
        tracing::debug!(bar = name, index, "bar opened");
        self.staging = Some(StagedBar {
            bar,
            lines: BTreeMap::new(),
            failed: false,
        });
        Ok(())
    }

    /// Commit the open bar: fill in rests, resolve links with the previous
    /// bar, publish and cue it.
    pub(crate) fn close_bar(&mut self) -> Result<CommandOutput, ParseError> {
        let Some(staged) = self.staging.take() else {
            return Err(ParseError::command("'}' without an open bar"));
        };
        let StagedBar {
            mut bar,
            mut lines,
            failed,
        } = staged;
        if failed {
            return Ok(CommandOutput::warning(0, format!("bar {} discarded", bar.name)));
        }
        let index = bar.index;
        let mentioned: Vec<usize> = lines.keys().copied().collect();

        // 1. Instruments without a line rest for the whole bar.
        let mut events: BTreeMap<usize, BarEvents> = BTreeMap::new();
        for inst in self.score.live_instruments() {
            let ev = lines
                .remove(&inst.id)
                .unwrap_or_else(|| BarEvents::rest(bar.ticks, inst.last_dynamic));
            events.insert(inst.id, ev);
        }

        // 2. Ties, slurs and glissandi running in from the previous bar. A
        // redefined bar keeps the bar that still ties into it.
        let previous = self.score.graph.bar(index).cloned();
        let incoming = self
            .pending_link_from
            .filter(|&p| p != index && self.score.graph.bar(p).is_some())
            .or_else(|| previous.as_ref().and_then(|b| b.linked_from));
        if let Some(prev) = incoming {
            for (id, ev) in events.iter_mut() {
                let Some(inst) = self.score.instrument(*id) else {
                    continue;
                };
                if !inst.events(prev).is_some_and(|e| e.link_forward) {
                    continue;
                }
                if ev.steps.first().map_or(true, |s| s.rest) {
                    return Err(ParseError::linkage(format!(
                        "{} is tied from bar {} into a rest in bar {}",
                        inst.name,
                        self.bar_name(prev),
                        bar.name
                    ))
                    .in_bar());
                }
                ev.link_backward = true;
            }
        }
        let links_forward = events.values().any(|e| e.link_forward);

        // 3. A redefined bar that still ties over keeps its successor.
        let outgoing = previous
            .and_then(|b| b.linked_to)
            .filter(|&t| links_forward && t != index);
        if let Some(next) = outgoing {
            for (id, ev) in &events {
                let Some(inst) = self.score.instrument(*id) else {
                    continue;
                };
                let into_rest = inst
                    .events(next)
                    .is_some_and(|e| e.steps.first().map_or(true, |s| s.rest));
                if ev.link_forward && into_rest {
                    return Err(ParseError::linkage(format!(
                        "{} is tied from bar {} into a rest in bar {}",
                        inst.name,
                        bar.name,
                        self.bar_name(next)
                    ))
                    .in_bar());
                }
            }
        }
        bar.linked_from = incoming;
        bar.linked_to = outgoing;

        // 4. Commit.
        let name = bar.name.clone();
        let released = self.score.graph.insert_bar(bar).map_err(ParseError::in_bar)?;
        for inst in self.score.live_instruments_mut() {
            for r in &released {
                if let Some(ev) = inst.bars.get_mut(r).filter(|e| e.link_backward) {
                    Arc::make_mut(ev).link_backward = false;
                }
            }
            if let Some(next) = outgoing {
                let forward = events.get(&inst.id).is_some_and(|e| e.link_forward);
                if let Some(ev) = inst.bars.get_mut(&next).filter(|e| e.link_backward != forward) {
                    Arc::make_mut(ev).link_backward = forward;
                }
            }
        }
        self.pending_link_from = (links_forward && outgoing.is_none()).then_some(index);
        let mut notifications = Vec::new();
        for (id, ev) in events {
            if let Some(n) = self.store_events(id, index, ev) {
                if mentioned.contains(&id) {
                    notifications.push(n);
                }
            }
        }
        self.cue = index;
        self.publish()?;
        self.send(SchedulerCommand::Cue(index))?;
        for n in notifications {
            self.notify(n);
        }
        tracing::debug!(bar = %name, index, "bar closed");
        Ok(CommandOutput::done(0))
    }

    fn bar_name(&self, index: usize) -> String {
        self.score
            .graph
            .bar(index)
            .map(|b| b.name.clone())
            .unwrap_or_default()
    }

    /// Send the current score to the scheduler.
    pub(crate) fn publish(&mut self) -> Result<(), ParseError> {
        let snapshot = Arc::new(PlaybackScore::from_score(&self.score));
        self.send(SchedulerCommand::Publish(snapshot))
    }

    pub(crate) fn send(&mut self, cmd: SchedulerCommand) -> Result<(), ParseError> {
        self.scheduler
            .send(cmd)
            .map_err(|e| ParseError::command(e.to_string()))
    }

    /// Broadcast a notification to every sink; delivery problems are logged.
    pub(crate) fn notify(&mut self, notification: Notification) {
        if let Err(e) = self.scheduler.send(SchedulerCommand::Notify(notification)) {
            tracing::warn!(error = %e, "notification dropped");
        }
    }

    pub(crate) fn open_midi_port(&mut self, port: usize) -> Result<(), ParseError> {
        let sink = MidiSink::<MidiOutputConnection>::open(port).map_err(|e| ParseError::command(e.to_string()))?;
        self.attach_sink(SinkKey::Midi(port), Box::new(sink))
    }

    pub(crate) fn open_client(&mut self, name: &str, host: &str, port: u16) -> Result<(), ParseError> {
        if !self.score.clients.contains_key(name) {
            self.score.check_new_name(name)?;
        }
        let client =
            RemoteClient::connect(name, host, port, 0).map_err(|e| ParseError::command(e.to_string()))?;
        self.attach_sink(SinkKey::Remote(name.to_string()), Box::new(client))?;
        self.score.clients.insert(
            name.to_string(),
            ClientInfo {
                name: name.to_string(),
                host: host.to_string(),
                port,
                delay_ms: 0,
            },
        );
        Ok(())
    }

    pub(crate) fn listen(&mut self, port: u16) -> Result<u16, ParseError> {
        if let Some(mut old) = self.listener.take() {
            old.stop();
        }
        let listener = OscListener::start(port, self.remote_tx.clone())
            .map_err(|e| ParseError::command(format!("cannot listen on port {port}: {e}")))?;
        let bound = listener.port();
        self.listener = Some(listener);
        Ok(bound)
    }

    /// Sender for remote input, for embedding code that reads its own sockets.
    pub fn remote_sender(&self) -> Sender<RemoteInput> {
        self.remote_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TransportState;

    fn session() -> Session {
        Session::new(SessionConfig::default())
    }

    fn ok(s: &mut Session, line: &str) {
        let r = s.parse_line(line, 0);
        assert!(r.severity < Severity::Error, "{line}: {}", r.message);
    }

    fn err(s: &mut Session, line: &str) -> String {
        let r = s.parse_line(line, 0);
        assert_eq!(r.severity, Severity::Error, "{line} should fail");
        r.message
    }

    #[test]
    fn single_line_bar_compiles_four_quarters() {
        let mut s = session();
        ok(&mut s, "\\insts inst1");
        ok(&mut s, "\\bar 1 { \\inst1 c'4 d'4 e'4 f'4 }");
        let id = s.score.instrument_id("inst1").unwrap();
        let index = s.score.graph.lookup("1").unwrap();
        let events = s.score.instrument(id).unwrap().events(index).unwrap();
        let durations: Vec<u32> = events.steps.iter().map(|e| e.duration).collect();
        assert_eq!(durations, vec![64, 64, 64, 64]);
        assert_eq!(s.cue(), index);
        assert!(s.open_bar().is_none());
    }

    #[test]
    fn multi_line_bar_stages_until_close() {
        let mut s = session();
        ok(&mut s, "\\insts vln vla");
        ok(&mut s, "\\bar intro {");
        assert_eq!(s.open_bar(), Some("intro"));
        ok(&mut s, "\\vln c'1");
        assert!(s.score.graph.lookup("intro").is_none());
        ok(&mut s, "}");
        let index = s.score.graph.lookup("intro").unwrap();
        let vla = s.score.instrument_id("vla").unwrap();
        assert!(s.score.instrument(vla).unwrap().events(index).unwrap().is_silent());
    }

    #[test]
    fn bar_error_discards_the_bar_and_keeps_the_cue() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\bar a { \\vln c'1 }");
        let a = s.cue();
        ok(&mut s, "\\bar b {");
        err(&mut s, "\\vln c'4 d'4");
        let skipped = s.parse_line("\\vln c'1", 1);
        assert_eq!(skipped.severity, Severity::Note);
        let closed = s.parse_line("}", 2);
        assert_eq!(closed.severity, Severity::Warning);
        assert!(s.score.graph.lookup("b").is_none());
        assert_eq!(s.cue(), a);
        assert!(s.open_bar().is_none());
    }

    #[test]
    fn error_on_a_single_line_bar_closes_it() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        err(&mut s, "\\bar a { \\vln c'4 }");
        assert!(s.open_bar().is_none());
        assert!(s.score.graph.lookup("a").is_none());
    }

    #[test]
    fn tie_into_a_rest_is_rejected() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\bar a { \\vln c'1~ }");
        let msg = err(&mut s, "\\bar b { \\vln r1 }");
        assert!(msg.contains("rest"), "{msg}");
        ok(&mut s, "\\bar b { \\vln c'1 }");
        let a = s.score.graph.lookup("a").unwrap();
        let b = s.score.graph.lookup("b").unwrap();
        assert_eq!(s.score.graph.bar(a).unwrap().linked_to, Some(b));
        assert_eq!(s.score.graph.bar(b).unwrap().linked_from, Some(a));
        let vln = s.score.instrument_id("vln").unwrap();
        assert!(s.score.instrument(vln).unwrap().events(b).unwrap().link_backward);
    }

    #[test]
    fn linking_a_looped_bar_is_rejected() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\bar a { \\vln c'1~ }");
        ok(&mut s, "\\loop l a");
        let msg = err(&mut s, "\\bar b { \\vln c'1 }");
        assert!(msg.contains("bar a") && msg.contains("bar b"), "{msg}");
        assert!(s.score.graph.lookup("b").is_none());
        let a = s.score.graph.lookup("a").unwrap();
        assert_eq!(s.score.graph.bar(a).unwrap().linked_to, None);
        let l = s.score.graph.lookup("l").unwrap();
        assert!(s.score.graph.validate_sequence(&[a], "l").is_ok());
        assert_eq!(s.score.graph.sequence(l), Some(vec![a]));
    }

    #[test]
    fn redefining_a_bar_without_its_tie_unlinks_it() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\bar a { \\vln c'1~ }");
        ok(&mut s, "\\bar b { \\vln c'1 }");
        err(&mut s, "\\loop l b");

        ok(&mut s, "\\bar a { \\vln d'1 }");
        let a = s.score.graph.lookup("a").unwrap();
        let b = s.score.graph.lookup("b").unwrap();
        assert_eq!(s.score.graph.bar(a).unwrap().linked_to, None);
        assert_eq!(s.score.graph.bar(b).unwrap().linked_from, None);
        let vln = s.score.instrument_id("vln").unwrap();
        assert!(!s.score.instrument(vln).unwrap().events(b).unwrap().link_backward);
        ok(&mut s, "\\loop l b");
        ok(&mut s, "\\delete a");
    }

    #[test]
    fn redefinitions_keep_links_still_tied() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\bar a { \\vln c'1~ }");
        ok(&mut s, "\\bar b { \\vln c'1 }");
        ok(&mut s, "\\bar c { \\vln e'1 }");

        // b keeps its source, a keeps its target
        ok(&mut s, "\\bar b { \\vln c'2 d'2 }");
        ok(&mut s, "\\bar a { \\vln g'2 c'2~ }");
        let a = s.score.graph.lookup("a").unwrap();
        let b = s.score.graph.lookup("b").unwrap();
        assert_eq!(s.score.graph.bar(a).unwrap().linked_to, Some(b));
        assert_eq!(s.score.graph.bar(b).unwrap().linked_from, Some(a));
        let vln = s.score.instrument_id("vln").unwrap();
        assert!(s.score.instrument(vln).unwrap().events(b).unwrap().link_backward);
        err(&mut s, "\\loop bad { a c }");

        // a tie into a redefined successor still may not land on a rest
        ok(&mut s, "\\bar b { \\vln c'1 }");
        let msg = err(&mut s, "\\bar b { \\vln r1 }");
        assert!(msg.contains("rest"), "{msg}");
    }

    #[test]
    fn default_bar_takes_the_length_of_its_line() {
        let mut s = session();
        ok(&mut s, "\\insts vln vla");
        ok(&mut s, "\\vla c'1");
        ok(&mut s, "\\vln c'4 d'4");
        assert_eq!(s.score.graph.bar(DEFAULT_BAR).unwrap().ticks, 128);
        let vla = s.score.instrument_id("vla").unwrap();
        let events = s.score.instrument(vla).unwrap().events(DEFAULT_BAR).unwrap();
        assert!(events.is_silent());
        assert_eq!(events.ticks, 128);
    }

    #[test]
    fn inactive_session_ignores_lines() {
        let mut s = session();
        s.set_active(false);
        let r = s.parse_line("\\insts vln", 0);
        assert_eq!(r.severity, Severity::Note);
        assert!(s.score.instrument_id("vln").is_none());
        ok(&mut s, "\\active on");
        assert!(s.is_active());
    }

    #[test]
    fn multi_line_function_collects_its_body() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\function riff {");
        ok(&mut s, "\\bar r { \\vln $1 }");
        ok(&mut s, "}");
        assert_eq!(s.score.functions["riff"].body.len(), 1);
        ok(&mut s, "\\riff { c'1 }");
        assert!(s.score.graph.lookup("r").is_some());
    }

    #[test]
    fn chained_function_waits_for_the_open_bar() {
        let mut s = session();
        ok(&mut s, "\\insts vln");
        ok(&mut s, "\\function tick { \\print tick }");
        ok(&mut s, "\\function tock { \\print tock }");
        ok(&mut s, "\\bar x {");
        ok(&mut s, "\\vln c'1");

        let mut results = Vec::new();
        s.handle_event(
            SchedulerEvent::FunctionUnbound {
                name: "tick".into(),
                chained: Some("tock".into()),
            },
            &mut results,
        );
        assert!(results.is_empty());
        assert_eq!(s.deferred_calls.len(), 1);

        ok(&mut s, "}");
        let results = s.poll();
        assert!(results.iter().any(|r| r.message == "tock"));
        assert!(s.deferred_calls.is_empty());
        assert!(s.score.graph.lookup("x").is_some());
    }

    #[test]
    fn recursion_is_bounded() {
        let mut s = session();
        ok(&mut s, "\\function again { \\again }");
        let msg = err(&mut s, "\\again");
        assert!(msg.contains("nests deeper"), "{msg}");
        assert_eq!(s.call_depth, 0);
    }

    #[test]
    fn errors_are_recorded() {
        let mut s = session();
        err(&mut s, "\\nosuchthing");
        assert_eq!(s.diagnostics().len(), 1);
        assert_eq!(s.status().state, TransportState::Idle);
    }
}
