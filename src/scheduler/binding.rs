//! Function bindings evaluated on the scheduler thread.

use super::command::SchedulerEvent;
use crate::score::{BindTarget, Binding};

#[derive(Debug, Clone, PartialEq)]
struct ActiveBinding {
    function: String,
    target: BindTarget,
    step: usize,
    increment: usize,
    remaining: Option<u32>,
    chained: Option<String>,
}

#[derive(Debug, Default)]
pub struct BindingTable {
    entries: Vec<ActiveBinding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `function`, replacing any previous binding of it.
    pub fn bind(&mut self, function: &str, binding: &Binding) {
        self.unbind(function);
        self.entries.push(ActiveBinding {
            function: function.to_string(),
            target: binding.target.clone(),
            step: binding.step,
            increment: binding.increment,
            remaining: binding.repeat,
            chained: binding.chained.clone(),
        });
    }

    pub fn unbind(&mut self, function: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|b| b.function != function);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire everything bound to a beat, bar, loop, frame or finish event.
    pub fn on_event(&mut self, target: &BindTarget) -> Vec<SchedulerEvent> {
        self.fire(|b| &b.target == target)
    }

    /// Fire step bindings of `instrument` waiting for `step`, then advance
    /// them by their increment modulo `steps`.
    pub fn on_step(&mut self, instrument: usize, step: usize, steps: usize) -> Vec<SchedulerEvent> {
        let events = self.fire(|b| b.target == BindTarget::Instrument(instrument) && b.step == step);
        for b in &mut self.entries {
            if b.target == BindTarget::Instrument(instrument) && b.step == step && steps > 0 {
                b.step = (b.step + b.increment) % steps;
            }
        }
        events
    }

    fn fire(&mut self, matches: impl Fn(&ActiveBinding) -> bool) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        let mut released = Vec::new();
        for (i, b) in self.entries.iter_mut().enumerate() {
            if !matches(b) {
                continue;
            }
            events.push(SchedulerEvent::CallFunction(b.function.clone()));
            if let Some(n) = b.remaining.as_mut() {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    released.push(i);
                }
            }
        }
        for i in released.into_iter().rev() {
            let b = self.entries.remove(i);
            events.push(SchedulerEvent::FunctionUnbound {
                name: b.function,
                chained: b.chained,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(events: &[SchedulerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SchedulerEvent::CallFunction(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn beat_binding_fires_every_time() {
        let mut table = BindingTable::new();
        table.bind("pulse", &Binding::new(BindTarget::Beat));
        for _ in 0..3 {
            assert_eq!(calls(&table.on_event(&BindTarget::Beat)), vec!["pulse"]);
        }
        assert!(table.on_event(&BindTarget::Bar).is_empty());
    }

    #[test]
    fn repeat_count_unbinds_and_chains() {
        let mut table = BindingTable::new();
        let mut binding = Binding::new(BindTarget::Bar);
        binding.repeat = Some(2);
        binding.chained = Some("after".into());
        table.bind("twice", &binding);

        assert_eq!(table.on_event(&BindTarget::Bar).len(), 1);
        let events = table.on_event(&BindTarget::Bar);
        assert_eq!(
            events,
            vec![
                SchedulerEvent::CallFunction("twice".into()),
                SchedulerEvent::FunctionUnbound {
                    name: "twice".into(),
                    chained: Some("after".into()),
                },
            ]
        );
        assert!(table.is_empty());
    }

    #[test]
    fn step_binding_advances_by_increment() {
        let mut table = BindingTable::new();
        let mut binding = Binding::new(BindTarget::Instrument(3));
        binding.step = 1;
        binding.increment = 2;
        table.bind("walk", &binding);

        // four steps per bar: fires at 1, then 3, then wraps to 1
        let fired: Vec<usize> = (0..8)
            .filter(|&i| !table.on_step(3, i % 4, 4).is_empty())
            .collect();
        assert_eq!(fired, vec![1, 3, 5, 7]);
        assert!(table.on_step(2, 1, 4).is_empty());
    }

    #[test]
    fn rebinding_replaces() {
        let mut table = BindingTable::new();
        table.bind("f", &Binding::new(BindTarget::Beat));
        table.bind("f", &Binding::new(BindTarget::Loop));
        assert_eq!(table.len(), 1);
        assert!(table.on_event(&BindTarget::Beat).is_empty());
        assert!(table.unbind("f"));
        assert!(!table.unbind("f"));
    }
}
