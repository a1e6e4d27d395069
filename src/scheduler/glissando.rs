//! Continuous pitch glides between two events.

use std::time::Duration;

/// A running glissando of one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Glide {
    pub instrument: usize,
    from: Vec<f32>,
    to: Vec<f32>,
    start: Duration,
    length: Duration,
    next_update: Duration,
}

impl Glide {
    pub fn new(instrument: usize, from: Vec<f32>, to: Vec<f32>, start: Duration, length: Duration) -> Self {
        Self {
            instrument,
            from,
            to,
            start,
            length,
            next_update: start,
        }
    }

    /// Pitches at `now`, interpolated linearly. Chord voices pair by index;
    /// surplus voices head for the last target pitch.
    pub fn pitches_at(&self, now: Duration) -> Vec<f32> {
        let progress = if self.length.is_zero() {
            1.0
        } else {
            (now.saturating_sub(self.start).as_secs_f64() / self.length.as_secs_f64()).min(1.0) as f32
        };
        self.from
            .iter()
            .enumerate()
            .map(|(i, &from)| {
                let to = self.to.get(i).or(self.to.last()).copied().unwrap_or(from);
                from + (to - from) * progress
            })
            .collect()
    }

    pub fn finished(&self, now: Duration) -> bool {
        now >= self.start + self.length
    }

    /// Pitches to send if an update is due at `now`.
    pub fn due(&mut self, now: Duration, interval: Duration) -> Option<Vec<f32>> {
        if now < self.next_update {
            return None;
        }
        self.next_update = now + interval;
        Some(self.pitches_at(now))
    }
}
