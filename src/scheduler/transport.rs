//! Transport state and the lock-free status observers read.

use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Scheduler state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Idle = 0,
    Starting = 1,
    Countdown = 2,
    Running = 3,
    Stopping = 4,
    Finishing = 5,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportState::Starting,
            2 => TransportState::Countdown,
            3 => TransportState::Running,
            4 => TransportState::Stopping,
            5 => TransportState::Finishing,
            _ => TransportState::Idle,
        }
    }

    /// Units advance in these states.
    pub fn is_playing(self) -> bool {
        matches!(
            self,
            TransportState::Running | TransportState::Stopping | TransportState::Finishing
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TransportState::Idle => "idle",
            TransportState::Starting => "starting",
            TransportState::Countdown => "countdown",
            TransportState::Running => "running",
            TransportState::Stopping => "stopping",
            TransportState::Finishing => "finishing",
        }
    }
}

/// Written by the scheduler thread, read by anyone.
#[derive(Debug)]
pub struct SchedulerStatus {
    state: AtomicU8,
    loop_index: AtomicUsize,
    position: AtomicUsize,
    bar: AtomicUsize,
    unit: AtomicU32,
    beat: AtomicU32,
}

/// A consistent-enough copy of [`SchedulerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: TransportState,
    pub loop_index: usize,
    pub position: usize,
    pub bar: usize,
    pub unit: u32,
    pub beat: u32,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransportState::Idle as u8),
            loop_index: AtomicUsize::new(0),
            position: AtomicUsize::new(0),
            bar: AtomicUsize::new(0),
            unit: AtomicU32::new(0),
            beat: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn set_position(&self, loop_index: usize, position: usize, bar: usize) {
        self.loop_index.store(loop_index, Ordering::Relaxed);
        self.position.store(position, Ordering::Relaxed);
        self.bar.store(bar, Ordering::Relaxed);
    }

    pub fn set_unit(&self, unit: u32) {
        self.unit.store(unit, Ordering::Relaxed);
    }

    pub fn set_beat(&self, beat: u32) {
        self.beat.store(beat, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            loop_index: self.loop_index.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
            bar: self.bar.load(Ordering::Relaxed),
            unit: self.unit.load(Ordering::Relaxed),
            beat: self.beat.load(Ordering::Relaxed),
        }
    }
}
