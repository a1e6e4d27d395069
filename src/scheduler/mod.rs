//! Scheduler: a dedicated playback thread, a lock-free command queue and a
//! status block readable without locking.
//!
//! The [`Scheduler`] handle lives on the compiler thread. While nothing is
//! playing the engine is parked inside the handle and commands are applied
//! to it directly; `play` moves it onto its own thread, which hands it back
//! when playback ends.

pub mod binding;
pub mod clock;
pub mod command;
pub mod engine;
pub mod glissando;
pub mod snapshot;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ringbuf::{
    traits::{Producer, Split},
    HeapProd, HeapRb,
};
use thiserror::Error;

pub use command::{SchedulerCommand, SchedulerEvent};
pub use engine::{EngineConfig, PlaybackEngine, TickOutcome};
pub use snapshot::PlaybackScore;
pub use transport::{SchedulerStatus, StatusSnapshot, TransportState};

use crate::sink::{Sink, SinkKey};

/// Default ring buffer capacity (number of commands).
pub const RING_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler command queue is full")]
    QueueFull,
    #[error("scheduler thread is gone")]
    Unavailable,
}

enum EngineSlot {
    Parked(Box<PlaybackEngine>),
    Running(JoinHandle<Box<PlaybackEngine>>),
    /// The playback thread panicked and took the engine with it.
    Lost,
}

pub struct Scheduler {
    slot: EngineSlot,
    producer: HeapProd<SchedulerCommand>,
    events: Receiver<SchedulerEvent>,
    status: Arc<SchedulerStatus>,
    halt: Arc<AtomicBool>,
    epoch: Instant,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(config: EngineConfig, tick_interval: Duration) -> Self {
        Self::with_capacity(config, tick_interval, RING_BUFFER_CAPACITY)
    }

    pub fn with_capacity(config: EngineConfig, tick_interval: Duration, capacity: usize) -> Self {
        let rb = HeapRb::<SchedulerCommand>::new(capacity.max(16));
        let (producer, consumer) = rb.split();
        let (tx, events) = mpsc::channel();
        let status = Arc::new(SchedulerStatus::new());
        let halt = Arc::new(AtomicBool::new(false));
        let engine = PlaybackEngine::new(config, consumer, tx, Arc::clone(&status), Arc::clone(&halt));
        Self {
            slot: EngineSlot::Parked(Box::new(engine)),
            producer,
            events,
            status,
            halt,
            epoch: Instant::now(),
            tick_interval: tick_interval.max(Duration::from_micros(100)),
        }
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Deliver a command; starts the playback thread when it begins playing.
    pub fn send(&mut self, cmd: SchedulerCommand) -> Result<(), SchedulerError> {
        self.reclaim();
        let now = self.now();
        match &mut self.slot {
            EngineSlot::Parked(engine) => {
                engine.apply(cmd, now);
                let start = engine.wants_thread();
                if start {
                    self.spawn();
                }
                Ok(())
            }
            EngineSlot::Running(_) => self.producer.try_push(cmd).map_err(|_| SchedulerError::QueueFull),
            EngineSlot::Lost => Err(SchedulerError::Unavailable),
        }
    }

    pub fn attach_sink(&mut self, key: SinkKey, sink: Box<dyn Sink>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::AttachSink(key, sink))
    }

    /// Halt playback at once: silence every sink and join the thread.
    pub fn stop_now(&mut self) {
        let now = self.now();
        match std::mem::replace(&mut self.slot, EngineSlot::Lost) {
            EngineSlot::Running(handle) => {
                self.halt.store(true, Ordering::Release);
                self.slot = Self::join(handle);
                self.halt.store(false, Ordering::Release);
            }
            EngineSlot::Parked(mut engine) => {
                engine.stop_now(now);
                self.slot = EngineSlot::Parked(engine);
            }
            EngineSlot::Lost => {}
        }
        let now = self.now();
        if let EngineSlot::Parked(engine) = &mut self.slot {
            engine.drain_after_stop(now);
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.slot, EngineSlot::Running(handle) if !handle.is_finished())
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Events reported since the last call.
    pub fn poll_events(&mut self) -> Vec<SchedulerEvent> {
        self.reclaim();
        self.events.try_iter().collect()
    }

    /// Take the engine back from a finished thread and apply anything
    /// queued after it stopped reading.
    fn reclaim(&mut self) {
        let finished = matches!(&self.slot, EngineSlot::Running(handle) if handle.is_finished());
        if finished {
            if let EngineSlot::Running(handle) = std::mem::replace(&mut self.slot, EngineSlot::Lost) {
                self.slot = Self::join(handle);
            }
        }
        let now = self.now();
        let mut restart = false;
        if let EngineSlot::Parked(engine) = &mut self.slot {
            engine.drain_commands(now);
            restart = engine.wants_thread();
        }
        if restart {
            self.spawn();
        }
    }

    fn join(handle: JoinHandle<Box<PlaybackEngine>>) -> EngineSlot {
        match handle.join() {
            Ok(engine) => EngineSlot::Parked(engine),
            Err(_) => {
                tracing::error!("scheduler thread panicked");
                EngineSlot::Lost
            }
        }
    }

    fn spawn(&mut self) {
        let EngineSlot::Parked(engine) = std::mem::replace(&mut self.slot, EngineSlot::Lost) else {
            return;
        };
        let epoch = self.epoch;
        let interval = self.tick_interval;
        let handle = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || run(engine, epoch, interval));
        match handle {
            Ok(handle) => self.slot = EngineSlot::Running(handle),
            Err(e) => tracing::error!(error = %e, "failed to start scheduler thread"),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if matches!(self.slot, EngineSlot::Running(_)) {
            self.stop_now();
        }
    }
}

fn run(mut engine: Box<PlaybackEngine>, epoch: Instant, interval: Duration) -> Box<PlaybackEngine> {
    tracing::debug!("scheduler thread started");
    loop {
        let now = epoch.elapsed();
        engine.drain_commands(now);
        if engine.tick(now) == TickOutcome::Halt {
            break;
        }
        thread::sleep(interval);
    }
    tracing::debug!("scheduler thread stopped");
    engine
}
