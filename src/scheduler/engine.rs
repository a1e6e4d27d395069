//! The playback engine: a unit counter driving sinks from a score snapshot.
//!
//! All timing is relative to the `now` handed to [`PlaybackEngine::tick`],
//! so the engine runs the same on the scheduler thread and in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

use super::binding::BindingTable;
use super::clock::{MidiClock, DEFAULT_PPQN};
use super::command::{SchedulerCommand, SchedulerEvent};
use super::glissando::Glide;
use super::snapshot::{PlayInstrument, PlaybackScore};
use super::transport::{SchedulerStatus, TransportState};
use crate::dsl::duration::MINDUR;
use crate::score::event::{BarEvents, StepEvent};
use crate::score::{BindTarget, Meter, Tempo};
use crate::sink::{Notification, Sink, SinkError, SinkKey, TransportSignal};

/// Upper bound on units processed in one tick after a stall.
const MAX_CATCH_UP: u32 = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Beats counted in before playing; 0 disables the countdown.
    pub countdown: u32,
    pub midi_clock: bool,
    pub midi_clock_ppqn: u32,
    /// Time between glissando updates.
    pub gliss_interval: Duration,
    /// Interval of `framerate` bindings.
    pub frame_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            countdown: 0,
            midi_clock: false,
            midi_clock_ppqn: DEFAULT_PPQN,
            gliss_interval: Duration::from_millis(10),
            frame_interval: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Playback ended; the engine is idle.
    Halt,
}

#[derive(Debug, Default)]
struct Voice {
    sounding: Vec<f32>,
    tie_pending: bool,
    muted: bool,
    solo: bool,
    pending_mute: Option<bool>,
    pending_solo: Option<bool>,
}

pub struct PlaybackEngine {
    commands: HeapCons<SchedulerCommand>,
    events: Sender<SchedulerEvent>,
    status: Arc<SchedulerStatus>,
    halt: Arc<AtomicBool>,
    config: EngineConfig,
    score: Arc<PlaybackScore>,
    pending_score: Option<Arc<PlaybackScore>>,
    sinks: BTreeMap<SinkKey, Box<dyn Sink>>,
    state: TransportState,
    /// Bar or loop index being played, or to be played on start.
    cue: usize,
    pending_loop: Option<usize>,
    pending_goto: Option<usize>,
    sequence: Vec<usize>,
    position: usize,
    bar: usize,
    meter: Meter,
    bar_ticks: u32,
    /// `None` until the first unit of a run.
    unit: Option<u32>,
    unit_duration: Duration,
    last_boundary: Duration,
    countdown_left: u32,
    voices: HashMap<usize, Voice>,
    glides: Vec<Glide>,
    clock: MidiClock,
    bindings: BindingTable,
    next_frame: Option<Duration>,
    now: Duration,
    outbox: Vec<SchedulerEvent>,
}

impl PlaybackEngine {
    pub fn new(
        config: EngineConfig,
        commands: HeapCons<SchedulerCommand>,
        events: Sender<SchedulerEvent>,
        status: Arc<SchedulerStatus>,
        halt: Arc<AtomicBool>,
    ) -> Self {
        let clock = MidiClock::new(config.midi_clock, config.midi_clock_ppqn);
        Self {
            commands,
            events,
            status,
            halt,
            config,
            score: Arc::new(PlaybackScore::default()),
            pending_score: None,
            sinks: BTreeMap::new(),
            state: TransportState::Idle,
            cue: 0,
            pending_loop: None,
            pending_goto: None,
            sequence: Vec::new(),
            position: 0,
            bar: 0,
            meter: Meter::COMMON,
            bar_ticks: MINDUR,
            unit: None,
            unit_duration: unit_duration(&Tempo::default()),
            last_boundary: Duration::ZERO,
            countdown_left: 0,
            voices: HashMap::new(),
            glides: Vec::new(),
            clock,
            bindings: BindingTable::new(),
            next_frame: None,
            now: Duration::ZERO,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// The engine has work that needs the scheduler thread.
    pub fn wants_thread(&self) -> bool {
        self.state != TransportState::Idle
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply every queued command.
    pub fn drain_commands(&mut self, now: Duration) {
        while let Some(cmd) = self.commands.try_pop() {
            self.apply(cmd, now);
        }
    }

    /// Apply queued commands after a stop-now, dropping transport requests
    /// that would start playback again.
    pub fn drain_after_stop(&mut self, now: Duration) {
        while let Some(cmd) = self.commands.try_pop() {
            if cmd.is_transport() {
                tracing::debug!(command = ?cmd, "dropped after stop");
                continue;
            }
            self.apply(cmd, now);
        }
    }

    pub fn apply(&mut self, cmd: SchedulerCommand, now: Duration) {
        self.now = now;
        match cmd {
            SchedulerCommand::Publish(score) => {
                if self.state.is_playing() {
                    self.pending_score = Some(score);
                } else {
                    self.score = score;
                }
            }
            SchedulerCommand::Play(cue) => {
                if let Some(cue) = cue {
                    self.cue_loop(cue);
                }
                match self.state {
                    TransportState::Idle => self.set_state(TransportState::Starting),
                    TransportState::Stopping | TransportState::Finishing => {
                        self.set_state(TransportState::Running)
                    }
                    _ => {}
                }
            }
            SchedulerCommand::Cue(cue) => self.cue_loop(cue),
            SchedulerCommand::Stop => match self.state {
                TransportState::Starting | TransportState::Countdown => {
                    self.halt_with(SchedulerEvent::Stopped);
                }
                TransportState::Running | TransportState::Finishing => {
                    self.set_state(TransportState::Stopping)
                }
                _ => {}
            },
            SchedulerCommand::Finish => {
                if self.state == TransportState::Running {
                    self.set_state(TransportState::Finishing);
                }
            }
            SchedulerCommand::Goto(position) => self.pending_goto = Some(position),
            SchedulerCommand::SetCountdown(beats) => self.config.countdown = beats,
            SchedulerCommand::Mute {
                instrument,
                muted,
                now: immediate,
            } => {
                let voice = self.voices.entry(instrument).or_default();
                if immediate || !self.state.is_playing() {
                    voice.muted = muted;
                    voice.pending_mute = None;
                    if muted {
                        self.release(instrument);
                    }
                } else {
                    voice.pending_mute = Some(muted);
                }
            }
            SchedulerCommand::Solo {
                instrument,
                solo,
                now: immediate,
            } => {
                let voice = self.voices.entry(instrument).or_default();
                if immediate || !self.state.is_playing() {
                    voice.solo = solo;
                    voice.pending_solo = None;
                    self.release_unheard();
                } else {
                    voice.pending_solo = Some(solo);
                }
            }
            SchedulerCommand::Bind { function, binding } => self.bindings.bind(&function, &binding),
            SchedulerCommand::Unbind(function) => {
                self.bindings.unbind(&function);
            }
            SchedulerCommand::UnbindAll => self.bindings.clear(),
            SchedulerCommand::MidiClock(enabled) => {
                self.config.midi_clock = enabled;
                self.clock.enabled = enabled;
                if self.state.is_playing() {
                    if enabled {
                        self.clock.start(now);
                        self.broadcast_transport(TransportSignal::Start);
                    } else {
                        self.clock.stop();
                        self.broadcast_transport(TransportSignal::Stop);
                    }
                }
            }
            SchedulerCommand::MidiClockPpqn(ppqn) => {
                self.config.midi_clock_ppqn = ppqn;
                self.clock.set_ppqn(ppqn);
            }
            SchedulerCommand::FrameInterval(ms) => {
                self.config.frame_interval = (ms > 0).then(|| Duration::from_millis(u64::from(ms)));
                self.next_frame = match self.config.frame_interval {
                    Some(interval) if self.state.is_playing() => Some(now + interval),
                    _ => None,
                };
            }
            SchedulerCommand::AttachSink(key, sink) => {
                tracing::debug!(sink = ?key, "sink attached");
                self.sinks.insert(key, sink);
            }
            SchedulerCommand::DetachSink(key) => {
                if let Some(mut sink) = self.sinks.remove(&key) {
                    let _ = sink.flush(Duration::MAX);
                }
            }
            SchedulerCommand::Notify(notification) => self.broadcast(&notification),
            SchedulerCommand::SendRaw { key, addr, args } => {
                if let Some(sink) = self.sinks.get_mut(&key) {
                    if let Err(e) = sink.send_raw(&addr, &args) {
                        tracing::warn!(sink = ?key, error = %e, "raw message failed");
                    }
                }
            }
            SchedulerCommand::SetDelay { key, delay_ms } => {
                if let Some(sink) = self.sinks.get_mut(&key) {
                    sink.set_delay(delay_ms);
                }
            }
        }
        self.flush_events();
    }

    /// Advance playback to `now`.
    pub fn tick(&mut self, now: Duration) -> TickOutcome {
        self.now = now;
        if self.halt.load(Ordering::Acquire) {
            return self.halt_with(SchedulerEvent::Stopped);
        }

        // 1. Leave the pre-roll states.
        match self.state {
            TransportState::Idle => return TickOutcome::Halt,
            TransportState::Starting => {
                if self.start(now) == TickOutcome::Halt {
                    return TickOutcome::Halt;
                }
            }
            TransportState::Countdown => self.count_down(now),
            _ => {}
        }

        // 2. Catch up on every unit boundary passed since the last tick.
        if self.state.is_playing() {
            let mut processed = 0;
            while now.saturating_sub(self.last_boundary) >= self.unit_duration {
                if processed == MAX_CATCH_UP {
                    tracing::warn!("scheduler fell behind; resyncing");
                    self.last_boundary = now;
                    break;
                }
                self.last_boundary += self.unit_duration;
                processed += 1;
                if self.advance_unit() == TickOutcome::Halt {
                    return TickOutcome::Halt;
                }
            }

            // 3. Continuous output between units.
            self.update_glides(now);
            self.run_clock(now);
            self.run_frames(now);
        }

        self.flush_sinks(now);
        self.flush_events();
        TickOutcome::Continue
    }

    /// Silence everything and go idle immediately.
    pub fn stop_now(&mut self, now: Duration) {
        self.now = now;
        if self.state == TransportState::Idle {
            self.silence_all();
            self.flush_sinks(now);
        } else {
            self.halt_with(SchedulerEvent::Stopped);
        }
    }

    fn set_state(&mut self, state: TransportState) {
        self.state = state;
        self.status.set_state(state);
    }

    fn cue_loop(&mut self, cue: usize) {
        if self.state == TransportState::Idle || self.state == TransportState::Starting {
            self.cue = cue;
        } else {
            self.pending_loop = Some(cue);
        }
    }

    fn start(&mut self, now: Duration) -> TickOutcome {
        let Some(sequence) = self.score.sequence(self.cue).map(<[usize]>::to_vec) else {
            self.fault(format!("nothing to play at index {}", self.cue));
            return self.halt_with(SchedulerEvent::Stopped);
        };
        self.sequence = sequence;
        self.position = self
            .pending_goto
            .take()
            .filter(|&p| p < self.sequence.len())
            .unwrap_or(0);
        self.bar = self.sequence[self.position];
        self.unit = None;
        self.last_boundary = now;
        if let Some(info) = self.score.bar(self.bar) {
            self.unit_duration = unit_duration(&info.tempo);
            self.meter = info.meter;
        }
        for voice in self.voices.values_mut() {
            voice.sounding.clear();
            voice.tie_pending = false;
        }
        self.outbox.push(SchedulerEvent::LoopChanged {
            loop_index: self.cue,
            position: self.position,
        });
        tracing::info!(cue = self.cue, position = self.position, "playback starting");

        if self.config.countdown > 0 {
            self.set_state(TransportState::Countdown);
            self.broadcast(&Notification::Countdown(self.config.countdown));
            self.countdown_left = self.config.countdown - 1;
        } else {
            self.begin_running(now);
        }
        TickOutcome::Continue
    }

    fn count_down(&mut self, now: Duration) {
        let beat = self.unit_duration * self.meter.beat_ticks();
        while now.saturating_sub(self.last_boundary) >= beat {
            self.last_boundary += beat;
            if self.countdown_left == 0 {
                let boundary = self.last_boundary;
                self.begin_running(boundary);
                return;
            }
            self.broadcast(&Notification::Countdown(self.countdown_left));
            self.countdown_left -= 1;
        }
    }

    fn begin_running(&mut self, at: Duration) {
        self.last_boundary = at;
        self.set_state(TransportState::Running);
        if self.clock.enabled {
            self.clock.start(at);
            self.broadcast_transport(TransportSignal::Start);
        }
        self.next_frame = self.config.frame_interval.map(|interval| at + interval);
    }

    fn advance_unit(&mut self) -> TickOutcome {
        match self.unit {
            None => {
                self.unit = Some(0);
                self.begin_bar(true);
            }
            Some(unit) if unit + 1 >= self.bar_ticks => {
                let wrapped = self.position + 1 >= self.sequence.len();
                match self.state {
                    TransportState::Stopping => return self.halt_with(SchedulerEvent::Stopped),
                    TransportState::Finishing if wrapped => return self.finish(),
                    _ => {}
                }
                self.position = if wrapped { 0 } else { self.position + 1 };
                self.unit = Some(0);
                self.begin_bar(wrapped);
            }
            Some(unit) => self.unit = Some(unit + 1),
        }
        self.play_unit();
        TickOutcome::Continue
    }

    fn begin_bar(&mut self, mut loop_start: bool) {
        let previous = self.bar;
        // 1. Swap in whatever the compiler published during the last bar.
        if let Some(score) = self.pending_score.take() {
            self.swap_score(score);
        }
        if let Some(cue) = self.pending_loop.take() {
            match self.score.sequence(cue) {
                Some(sequence) => {
                    self.sequence = sequence.to_vec();
                    self.cue = cue;
                    self.position = 0;
                    loop_start = true;
                    self.outbox.push(SchedulerEvent::LoopChanged {
                        loop_index: cue,
                        position: 0,
                    });
                }
                None => self.fault(format!("cannot cue index {cue}: nothing to play")),
            }
        }
        if let Some(position) = self.pending_goto.take() {
            if position < self.sequence.len() {
                self.position = position;
                self.outbox.push(SchedulerEvent::LoopChanged {
                    loop_index: self.cue,
                    position,
                });
            } else {
                self.fault(format!("loop position {} out of range", position + 1));
            }
        }
        if self.position >= self.sequence.len() {
            self.position = 0;
        }
        self.bar = self.sequence[self.position];

        // A tie only carries over into the bar it is linked to.
        let linked = self.score.bar(previous).and_then(|b| b.linked_to);
        if linked != Some(self.bar) {
            let cut: Vec<usize> = self
                .voices
                .iter()
                .filter(|(_, v)| v.tie_pending)
                .map(|(id, _)| *id)
                .collect();
            for id in cut {
                self.release(id);
            }
        }

        // 2. Deferred mute and solo changes land on the bar line.
        let mut changed = false;
        for voice in self.voices.values_mut() {
            if let Some(muted) = voice.pending_mute.take() {
                voice.muted = muted;
                changed = true;
            }
            if let Some(solo) = voice.pending_solo.take() {
                voice.solo = solo;
                changed = true;
            }
        }
        if changed {
            self.release_unheard();
        }

        // 3. Meter and tempo of the new bar.
        let name = match self.score.bar(self.bar).cloned() {
            Some(info) => {
                self.meter = info.meter;
                self.bar_ticks = info.ticks.max(1);
                self.unit_duration = unit_duration(&info.tempo);
                info.name
            }
            None => {
                self.fault(format!("bar {} is missing", self.bar));
                self.bar_ticks = self.meter.ticks().max(1);
                String::new()
            }
        };

        // 4. Observers.
        self.status.set_position(self.cue, self.position, self.bar);
        self.broadcast(&Notification::Bar {
            index: self.bar,
            name,
        });
        self.broadcast(&Notification::BeatInfo {
            ms: self.beat_duration().as_secs_f64() * 1000.0,
            num: self.meter.num,
            den: self.meter.den,
        });
        self.broadcast(&Notification::LoopIndex {
            loop_index: self.cue,
            position: self.position,
        });
        if loop_start {
            let fired = self.bindings.on_event(&BindTarget::Loop);
            self.outbox.extend(fired);
        }
        let fired = self.bindings.on_event(&BindTarget::Bar);
        self.outbox.extend(fired);
    }

    fn swap_score(&mut self, score: Arc<PlaybackScore>) {
        let gone: Vec<usize> = self
            .score
            .instruments
            .iter()
            .filter(|i| score.instrument(i.id).is_none())
            .map(|i| i.id)
            .collect();
        for id in gone {
            self.release(id);
            self.voices.remove(&id);
        }
        self.score = score;
        if let Some(sequence) = self.score.sequence(self.cue) {
            self.sequence = sequence.to_vec();
        }
    }

    fn play_unit(&mut self) {
        let Some(unit) = self.unit else {
            return;
        };
        self.status.set_unit(unit);

        let beat_ticks = self.meter.beat_ticks().max(1);
        if unit % beat_ticks == 0 {
            let beat = unit / beat_ticks + 1;
            self.status.set_beat(beat);
            self.broadcast(&Notification::Beat {
                beat,
                beats: self.bar_ticks.div_ceil(beat_ticks),
            });
            let fired = self.bindings.on_event(&BindTarget::Beat);
            self.outbox.extend(fired);
        }

        let score = Arc::clone(&self.score);
        for inst in &score.instruments {
            let Some(events) = inst.events.get(&self.bar) else {
                continue;
            };
            if let Some(index) = events.step_starting_at(unit) {
                self.play_step(inst, events, index);
            }
        }
    }

    fn play_step(&mut self, inst: &PlayInstrument, events: &BarEvents, index: usize) {
        let step = &events.steps[index];
        let key = inst.sink_key();
        let target = inst.target();

        let fired = self.bindings.on_step(inst.id, index, events.steps.len());
        self.outbox.extend(fired);
        self.broadcast(&Notification::Sequence {
            instrument: inst.id,
            step: index,
        });

        let audible = self.audible(inst.id);
        let voice = self.voices.entry(inst.id).or_default();
        let sounding = std::mem::take(&mut voice.sounding);

        if step.rest {
            voice.tie_pending = false;
            if audible {
                if !sounding.is_empty() {
                    self.emit(&key, |s| s.note_off(target, &sounding));
                }
                self.emit(&key, |s| s.rest(target));
            }
            return;
        }

        if voice.tie_pending {
            // continuation of a tied note: it keeps sounding
            voice.tie_pending = step.tie;
            voice.sounding = sounding;
            if step.gliss {
                self.launch_glide(inst, events, index);
            }
            return;
        }
        voice.tie_pending = step.tie;

        if !audible {
            if !sounding.is_empty() {
                self.emit(&key, |s| s.note_off(target, &sounding));
            }
            return;
        }

        self.emit(&key, |s| s.set_dynamic(target, step.dynamic));
        if !step.articulations.is_empty() {
            self.emit(&key, |s| s.set_articulation(target, &step.articulations));
        }
        for text in &step.texts {
            self.emit(&key, |s| s.set_text(target, text));
        }
        if step.slurred && !sounding.is_empty() {
            let released: Vec<f32> = sounding
                .iter()
                .copied()
                .filter(|p| !step.midi.contains(p))
                .collect();
            self.emit(&key, |s| s.note_on(target, &step.midi, step.velocity));
            if !released.is_empty() {
                self.emit(&key, |s| s.note_off(target, &released));
            }
        } else {
            if !sounding.is_empty() {
                self.emit(&key, |s| s.note_off(target, &sounding));
            }
            self.emit(&key, |s| s.note_on(target, &step.midi, step.velocity));
        }
        self.voices.entry(inst.id).or_default().sounding = step.midi.clone();

        if step.gliss {
            self.launch_glide(inst, events, index);
        }
    }

    /// The step after `index`, looking into the next bar of the sequence.
    fn next_step<'a>(&self, inst: &'a PlayInstrument, events: &'a BarEvents, index: usize) -> Option<&'a StepEvent> {
        if let Some(step) = events.steps.get(index + 1) {
            return Some(step);
        }
        let next_position = (self.position + 1) % self.sequence.len().max(1);
        let next_bar = *self.sequence.get(next_position)?;
        inst.events.get(&next_bar)?.steps.first()
    }

    fn launch_glide(&mut self, inst: &PlayInstrument, events: &BarEvents, index: usize) {
        let step = &events.steps[index];
        let Some(next) = self.next_step(inst, events, index) else {
            return;
        };
        if next.rest || next.midi.is_empty() {
            return;
        }
        self.glides.retain(|g| g.instrument != inst.id);
        self.glides.push(Glide::new(
            inst.id,
            step.midi.clone(),
            next.midi.clone(),
            self.last_boundary,
            self.unit_duration * step.duration,
        ));
    }

    fn update_glides(&mut self, now: Duration) {
        if self.glides.is_empty() {
            return;
        }
        let interval = self.config.gliss_interval;
        let score = Arc::clone(&self.score);
        let mut glides = std::mem::take(&mut self.glides);
        for glide in &mut glides {
            let Some(inst) = score.instrument(glide.instrument) else {
                continue;
            };
            if let Some(pitches) = glide.due(now, interval) {
                let target = inst.target();
                self.emit(&inst.sink_key(), |s| s.glide(target, &pitches));
            }
        }
        glides.retain(|g| !g.finished(now));
        self.glides = glides;
    }

    fn run_clock(&mut self, now: Duration) {
        let quarter = self.unit_duration * (MINDUR / 4);
        for _ in 0..self.clock.pulses_due(now, quarter) {
            for (key, sink) in self.sinks.iter_mut() {
                if let Err(e) = sink.clock_pulse() {
                    tracing::warn!(sink = ?key, error = %e, "clock pulse failed");
                }
            }
        }
    }

    fn run_frames(&mut self, now: Duration) {
        let Some(interval) = self.config.frame_interval else {
            return;
        };
        while let Some(next) = self.next_frame {
            if next > now {
                break;
            }
            let fired = self.bindings.on_event(&BindTarget::Framerate);
            self.outbox.extend(fired);
            self.next_frame = Some(next + interval);
        }
    }

    fn finish(&mut self) -> TickOutcome {
        let fired = self.bindings.on_event(&BindTarget::Finish);
        self.outbox.extend(fired);
        self.broadcast(&Notification::Finished);
        tracing::info!("playback finished");
        self.halt_with(SchedulerEvent::Finished)
    }

    fn halt_with(&mut self, event: SchedulerEvent) -> TickOutcome {
        self.silence_all();
        self.unit = None;
        self.pending_loop = None;
        self.set_state(TransportState::Idle);
        self.outbox.push(event);
        self.flush_sinks(self.now);
        self.flush_events();
        TickOutcome::Halt
    }

    fn silence_all(&mut self) {
        let score = Arc::clone(&self.score);
        for inst in &score.instruments {
            let target = inst.target();
            self.emit(&inst.sink_key(), |s| s.silence(target));
        }
        for voice in self.voices.values_mut() {
            voice.sounding.clear();
            voice.tie_pending = false;
        }
        self.glides.clear();
        if self.clock.is_started() {
            self.clock.stop();
            self.broadcast_transport(TransportSignal::Stop);
        }
        self.next_frame = None;
    }

    /// Note-off whatever `instrument` is holding.
    fn release(&mut self, instrument: usize) {
        let Some(voice) = self.voices.get_mut(&instrument) else {
            return;
        };
        let sounding = std::mem::take(&mut voice.sounding);
        voice.tie_pending = false;
        self.glides.retain(|g| g.instrument != instrument);
        if sounding.is_empty() {
            return;
        }
        let score = Arc::clone(&self.score);
        if let Some(inst) = score.instrument(instrument) {
            let target = inst.target();
            self.emit(&inst.sink_key(), |s| s.note_off(target, &sounding));
        }
    }

    /// Release instruments silenced by mute or solo.
    fn release_unheard(&mut self) {
        let unheard: Vec<usize> = self
            .voices
            .keys()
            .copied()
            .filter(|&id| !self.audible(id))
            .collect();
        for id in unheard {
            self.release(id);
        }
    }

    fn audible(&self, instrument: usize) -> bool {
        let any_solo = self.voices.values().any(|v| v.solo);
        match self.voices.get(&instrument) {
            Some(voice) => !voice.muted && (!any_solo || voice.solo),
            None => !any_solo,
        }
    }

    fn beat_duration(&self) -> Duration {
        self.unit_duration * self.meter.beat_ticks()
    }

    fn fault(&mut self, message: String) {
        tracing::warn!(%message, "playback fault");
        self.outbox.push(SchedulerEvent::Fault(message));
    }

    /// Run `f` on the instrument's routed sink and on every custom sink.
    fn emit(&mut self, key: &Option<SinkKey>, mut f: impl FnMut(&mut dyn Sink) -> Result<(), SinkError>) {
        for (k, sink) in self.sinks.iter_mut() {
            if !matches!(k, SinkKey::Custom(_)) && key.as_ref() != Some(k) {
                continue;
            }
            if let Err(e) = f(sink.as_mut()) {
                tracing::warn!(sink = ?k, error = %e, "sink error");
            }
        }
    }

    fn broadcast(&mut self, notification: &Notification) {
        for (key, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.notify(notification) {
                tracing::warn!(sink = ?key, error = %e, "notification failed");
            }
        }
    }

    fn broadcast_transport(&mut self, signal: TransportSignal) {
        for (key, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.transport(signal) {
                tracing::warn!(sink = ?key, error = %e, "transport message failed");
            }
        }
    }

    fn flush_sinks(&mut self, now: Duration) {
        for (key, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.flush(now) {
                tracing::warn!(sink = ?key, error = %e, "flush failed");
            }
        }
    }

    fn flush_events(&mut self) {
        for event in self.outbox.drain(..) {
            // the session may be gone during shutdown
            let _ = self.events.send(event);
        }
    }
}

/// Length of one tick at `tempo`, never zero.
pub fn unit_duration(tempo: &Tempo) -> Duration {
    Duration::from_secs_f64(tempo.ms_per_tick() / 1000.0).max(Duration::from_micros(1))
}
