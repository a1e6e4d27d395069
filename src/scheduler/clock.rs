//! MIDI beat clock, timed independently of the unit counter.

use std::time::Duration;

pub const DEFAULT_PPQN: u32 = 24;

#[derive(Debug, Clone)]
pub struct MidiClock {
    pub enabled: bool,
    ppqn: u32,
    next_pulse: Option<Duration>,
}

impl MidiClock {
    pub fn new(enabled: bool, ppqn: u32) -> Self {
        Self {
            enabled,
            ppqn: ppqn.max(1),
            next_pulse: None,
        }
    }

    pub fn set_ppqn(&mut self, ppqn: u32) {
        self.ppqn = ppqn.max(1);
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    pub fn start(&mut self, now: Duration) {
        self.next_pulse = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_pulse = None;
    }

    pub fn is_started(&self) -> bool {
        self.next_pulse.is_some()
    }

    /// Number of pulses due at `now` for a quarter note lasting `quarter`.
    pub fn pulses_due(&mut self, now: Duration, quarter: Duration) -> u32 {
        if !self.enabled {
            return 0;
        }
        let Some(next) = self.next_pulse.as_mut() else {
            return 0;
        };
        let interval = quarter / self.ppqn;
        if interval.is_zero() {
            return 0;
        }
        let mut pulses = 0;
        while *next <= now && pulses < self.ppqn {
            *next += interval;
            pulses += 1;
        }
        // too far behind: resync instead of bursting
        if *next <= now {
            *next = now + interval;
        }
        pulses
    }
}
