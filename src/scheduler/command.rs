//! Messages between the compiler thread and the scheduler thread.
//!
//! Commands travel compiler → scheduler through a ring buffer; events travel
//! back through an mpsc channel drained by the session.

use std::fmt;
use std::sync::Arc;

use super::snapshot::PlaybackScore;
use crate::score::Binding;
use crate::sink::{Notification, Sink, SinkKey};

pub enum SchedulerCommand {
    /// Replace the score; swapped in at the next bar start while playing.
    Publish(Arc<PlaybackScore>),
    /// Start playing, optionally cueing a loop first.
    Play(Option<usize>),
    /// Select the loop to play next without starting.
    Cue(usize),
    /// Silence at the next bar start.
    Stop,
    /// Play to the end of the loop, then halt.
    Finish,
    /// Jump to a 0-based loop position at the next bar start.
    Goto(usize),
    SetCountdown(u32),
    Mute {
        instrument: usize,
        muted: bool,
        now: bool,
    },
    Solo {
        instrument: usize,
        solo: bool,
        now: bool,
    },
    Bind {
        function: String,
        binding: Binding,
    },
    Unbind(String),
    UnbindAll,
    MidiClock(bool),
    MidiClockPpqn(u32),
    /// Interval of `framerate` bindings in ms; 0 disables them.
    FrameInterval(u32),
    AttachSink(SinkKey, Box<dyn Sink>),
    DetachSink(SinkKey),
    Notify(Notification),
    SendRaw {
        key: SinkKey,
        addr: String,
        args: Vec<String>,
    },
    SetDelay {
        key: SinkKey,
        delay_ms: u32,
    },
}

impl SchedulerCommand {
    /// Commands that start, stop or move playback.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SchedulerCommand::Play(_)
                | SchedulerCommand::Stop
                | SchedulerCommand::Finish
                | SchedulerCommand::Goto(_)
        )
    }
}

impl fmt::Debug for SchedulerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerCommand::Publish(_) => f.write_str("Publish"),
            SchedulerCommand::Play(cue) => write!(f, "Play({cue:?})"),
            SchedulerCommand::Cue(index) => write!(f, "Cue({index})"),
            SchedulerCommand::Stop => f.write_str("Stop"),
            SchedulerCommand::Finish => f.write_str("Finish"),
            SchedulerCommand::Goto(pos) => write!(f, "Goto({pos})"),
            SchedulerCommand::SetCountdown(n) => write!(f, "SetCountdown({n})"),
            SchedulerCommand::Mute {
                instrument,
                muted,
                now,
            } => write!(f, "Mute({instrument}, {muted}, now={now})"),
            SchedulerCommand::Solo {
                instrument,
                solo,
                now,
            } => write!(f, "Solo({instrument}, {solo}, now={now})"),
            SchedulerCommand::Bind { function, .. } => write!(f, "Bind({function})"),
            SchedulerCommand::Unbind(name) => write!(f, "Unbind({name})"),
            SchedulerCommand::UnbindAll => f.write_str("UnbindAll"),
            SchedulerCommand::MidiClock(on) => write!(f, "MidiClock({on})"),
            SchedulerCommand::MidiClockPpqn(n) => write!(f, "MidiClockPpqn({n})"),
            SchedulerCommand::FrameInterval(ms) => write!(f, "FrameInterval({ms})"),
            SchedulerCommand::AttachSink(key, _) => write!(f, "AttachSink({key:?})"),
            SchedulerCommand::DetachSink(key) => write!(f, "DetachSink({key:?})"),
            SchedulerCommand::Notify(n) => write!(f, "Notify({n:?})"),
            SchedulerCommand::SendRaw { key, addr, .. } => write!(f, "SendRaw({key:?}, {addr})"),
            SchedulerCommand::SetDelay { key, delay_ms } => write!(f, "SetDelay({key:?}, {delay_ms})"),
        }
    }
}

/// Reports from the scheduler thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A bound function fired.
    CallFunction(String),
    /// A binding ran out of repeats.
    FunctionUnbound { name: String, chained: Option<String> },
    LoopChanged { loop_index: usize, position: usize },
    Finished,
    Stopped,
    /// Something could not be played; the tick was skipped.
    Fault(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::{
        traits::{Consumer, Producer, Split},
        HeapRb,
    };

    #[test]
    fn command_send_receive_play() {
        let rb = HeapRb::<SchedulerCommand>::new(16);
        let (mut prod, mut cons) = rb.split();

        prod.try_push(SchedulerCommand::Play(Some(3))).unwrap();

        match cons.try_pop().unwrap() {
            SchedulerCommand::Play(cue) => assert_eq!(cue, Some(3)),
            other => panic!("expected Play, got {other:?}"),
        }
    }

    #[test]
    fn command_ordering_preserved() {
        let rb = HeapRb::<SchedulerCommand>::new(16);
        let (mut prod, mut cons) = rb.split();

        prod.try_push(SchedulerCommand::Cue(1)).unwrap();
        prod.try_push(SchedulerCommand::Goto(2)).unwrap();
        prod.try_push(SchedulerCommand::Stop).unwrap();

        assert!(matches!(cons.try_pop().unwrap(), SchedulerCommand::Cue(1)));
        assert!(matches!(cons.try_pop().unwrap(), SchedulerCommand::Goto(2)));
        assert!(matches!(cons.try_pop().unwrap(), SchedulerCommand::Stop));
        assert!(cons.try_pop().is_none());
    }

    #[test]
    fn full_queue_rejects_commands() {
        let rb = HeapRb::<SchedulerCommand>::new(1);
        let (mut prod, _cons) = rb.split();
        prod.try_push(SchedulerCommand::Stop).unwrap();
        assert!(prod.try_push(SchedulerCommand::Finish).is_err());
    }
}
