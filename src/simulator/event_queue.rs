//! Event queue and simulation clock for the planner simulator

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Simulation event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEventType {
    /// The step timer interrupt fires and emits one step.
    StepTimer,
    /// The background loop gets a turn to top up the planner queue.
    FillLoop,
}

/// Simulation event, stamped in timer ticks
#[derive(Debug, Clone, Copy)]
pub struct SimEvent {
    pub timestamp: u64,
    pub event_type: SimEventType,
    seq: u64,
}

impl PartialEq for SimEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for SimEvent {}
impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SimEvent {
    // Reversed so the max-heap pops the earliest event; ties go to whichever
    // was pushed first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Event queue for simulation
#[derive(Debug, Default)]
pub struct SimEventQueue {
    queue: BinaryHeap<SimEvent>,
    next_seq: u64,
}

impl SimEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timestamp: u64, event_type: SimEventType) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(SimEvent { timestamp, event_type, seq });
    }

    pub fn pop(&mut self) -> Option<SimEvent> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Simulation clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SimClock {
    pub current_time: u64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward to `timestamp`. Time never runs backwards.
    pub fn advance_to(&mut self, timestamp: u64) {
        self.current_time = self.current_time.max(timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_earliest_first() {
        let mut queue = SimEventQueue::new();
        queue.push(300, SimEventType::FillLoop);
        queue.push(100, SimEventType::StepTimer);
        queue.push(200, SimEventType::FillLoop);
        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|e| e.timestamp).collect();
        assert_eq!(order, vec![100, 200, 300]);
        assert!(queue.is_empty());
    }

    #[test]
    fn ties_keep_push_order() {
        let mut queue = SimEventQueue::new();
        queue.push(50, SimEventType::FillLoop);
        queue.push(50, SimEventType::StepTimer);
        queue.push(50, SimEventType::FillLoop);
        assert_eq!(queue.len(), 3);
        let kinds: Vec<SimEventType> = std::iter::from_fn(|| queue.pop()).map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![SimEventType::FillLoop, SimEventType::StepTimer, SimEventType::FillLoop]
        );
    }

    #[test]
    fn clock_is_monotonic() {
        let mut clock = SimClock::new();
        clock.advance_to(500);
        clock.advance_to(200);
        assert_eq!(clock.current_time, 500);
    }
}
