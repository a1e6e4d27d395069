//! Immutable playback snapshot published to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::score::{BarEvents, Meter, Route, Score, Tempo};
use crate::sink::{SinkKey, SinkTarget};

#[derive(Debug, Clone, PartialEq)]
pub struct BarInfo {
    pub index: usize,
    pub name: String,
    pub meter: Meter,
    pub tempo: Tempo,
    pub ticks: u32,
    /// Bar a tie at the end of this one continues into.
    pub linked_to: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PlayInstrument {
    pub id: usize,
    pub name: String,
    pub route: Route,
    pub events: HashMap<usize, Arc<BarEvents>>,
}

impl PlayInstrument {
    /// The sink this instrument's note events go to, besides custom sinks.
    pub fn sink_key(&self) -> Option<SinkKey> {
        match &self.route {
            Route::None => None,
            Route::Midi { port, .. } => Some(SinkKey::Midi(*port)),
            Route::Remote(client) => Some(SinkKey::Remote(client.clone())),
            Route::Engine(handle) => Some(SinkKey::Engine(*handle)),
        }
    }

    pub fn target(&self) -> SinkTarget {
        let channel = match self.route {
            Route::Midi { channel, .. } => channel,
            _ => 0,
        };
        SinkTarget {
            instrument: self.id,
            channel,
        }
    }
}

/// Everything the scheduler reads while playing.
#[derive(Debug, Clone, Default)]
pub struct PlaybackScore {
    pub bars: HashMap<usize, BarInfo>,
    /// Bar sequence of every bar and loop index.
    pub sequences: HashMap<usize, Vec<usize>>,
    pub instruments: Vec<PlayInstrument>,
}

impl PlaybackScore {
    pub fn from_score(score: &Score) -> Self {
        let bars = score
            .graph
            .bars()
            .map(|b| {
                (
                    b.index,
                    BarInfo {
                        index: b.index,
                        name: b.name.clone(),
                        meter: b.meter,
                        tempo: b.tempo,
                        ticks: b.ticks,
                        linked_to: b.linked_to,
                    },
                )
            })
            .collect();
        let mut sequences: HashMap<usize, Vec<usize>> =
            score.graph.bars().map(|b| (b.index, vec![b.index])).collect();
        sequences.extend(score.graph.loops().map(|l| (l.index, l.bars.clone())));
        let instruments = score
            .live_instruments()
            .map(|i| PlayInstrument {
                id: i.id,
                name: i.name.clone(),
                route: i.route.clone(),
                events: i.bars.clone(),
            })
            .collect();
        Self {
            bars,
            sequences,
            instruments,
        }
    }

    pub fn sequence(&self, index: usize) -> Option<&[usize]> {
        self.sequences
            .get(&index)
            .map(Vec::as_slice)
            .filter(|s| !s.is_empty())
    }

    pub fn bar(&self, index: usize) -> Option<&BarInfo> {
        self.bars.get(&index)
    }

    pub fn instrument(&self, id: usize) -> Option<&PlayInstrument> {
        self.instruments.iter().find(|i| i.id == id)
    }
}
