//! Fill-loop half of the planner.
//!
//! The background loop calls [`Producer::fill_queue`] whenever it has spare
//! time. Each call queues as much of the descriptor as fits and remembers
//! where it stopped, so calling it again with the same descriptor picks up
//! from there and never queues a step twice.
//!
//! Descriptor ids are expected to increase from one move to the next. An id
//! older than the one being queued is already in the queue and gets nothing
//! more; a newer id is held off until the current descriptor is fully queued.

use super::queue::{MoveQueue, QueueFull};
use super::{apply_delta, speed_delta, FillState};
use crate::dda::MotionDescriptor;

/// One queue entry worth of motion: run `steps` steps while moving the
/// interval towards `speed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub steps: u32,
    pub speed: u32,
}

/// Decides how a descriptor is cut into queue entries.
pub trait FillPolicy {
    /// The segment that starts `queued` steps into `dda`, or `None` when there
    /// is nothing left. Segments longer than what remains are trimmed.
    fn next_segment(&self, dda: &MotionDescriptor, queued: u32) -> Option<Segment>;
}

/// Ramp-up, cruise and ramp-down, one entry each. Empty phases are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapezoidFill;

impl FillPolicy for TrapezoidFill {
    fn next_segment(&self, dda: &MotionDescriptor, queued: u32) -> Option<Segment> {
        let (up, cruise, _) = dda.phases();
        let segment = if queued < up {
            Segment { steps: up - queued, speed: dda.cruise_c }
        } else if queued < up + cruise {
            Segment { steps: up + cruise - queued, speed: dda.cruise_c }
        } else if queued < dda.total_steps {
            Segment { steps: dda.total_steps - queued, speed: dda.end_c }
        } else {
            return None;
        };
        Some(segment)
    }
}

/// The whole move as a single entry at cruise speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleFill;

impl FillPolicy for SingleFill {
    fn next_segment(&self, dda: &MotionDescriptor, queued: u32) -> Option<Segment> {
        (queued < dda.total_steps).then(|| Segment {
            steps: dda.total_steps - queued,
            speed: dda.cruise_c,
        })
    }
}

/// What one `fill_queue` call achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillProgress {
    /// Queue entries added by this call.
    pub entries: usize,
    /// Steps added by this call.
    pub queued_steps: u32,
    /// Steps of the descriptor still waiting for a slot.
    pub remaining_steps: u32,
    /// The call stopped because the queue was full, or because an earlier
    /// descriptor still has steps waiting.
    pub blocked: bool,
}

impl FillProgress {
    pub fn is_complete(&self) -> bool {
        self.remaining_steps == 0
    }
}

#[derive(Debug)]
pub struct Producer<'a> {
    queue: &'a MoveQueue,
    state: &'a mut FillState,
}

impl<'a> Producer<'a> {
    pub(crate) fn new(queue: &'a MoveQueue, state: &'a mut FillState) -> Self {
        Self { queue, state }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Interval the last queued segment ends at.
    pub fn planned_c(&self) -> u32 {
        self.state.planned_c
    }

    /// Steps put into the queue since the last reset.
    pub fn planned_steps(&self) -> u64 {
        self.state.planned_steps
    }

    /// Steps of the current descriptor already queued.
    pub fn queued_steps(&self) -> u32 {
        self.state.queued
    }

    /// Queues `steps` steps that end at interval `speed`. The slot stores the
    /// change from the interval the queue currently ends at.
    pub fn put(&mut self, steps: u32, speed: u32) -> Result<(), QueueFull> {
        if self.queue.is_full() {
            return Err(QueueFull);
        }
        if steps == 0 {
            return Ok(());
        }
        let dc = speed_delta(self.state.planned_c, speed);
        self.queue.insert(steps, dc)?;
        self.state.planned_c = apply_delta(self.state.planned_c, dc);
        self.state.planned_steps += steps as u64;
        tracing::debug!(steps, speed, dc, tail = self.queue.tail(), "planner put");
        Ok(())
    }

    /// Queues the next part of `dda` with the trapezoid policy.
    pub fn fill_queue(&mut self, dda: &MotionDescriptor) -> FillProgress {
        self.fill_queue_with(dda, &TrapezoidFill)
    }

    pub fn fill_queue_with<P: FillPolicy + ?Sized>(
        &mut self,
        dda: &MotionDescriptor,
        policy: &P,
    ) -> FillProgress {
        match self.state.descriptor {
            Some(current) if current == dda.id => {}
            Some(current) if dda.id < current => {
                tracing::debug!(id = dda.id, current, "descriptor already queued");
                return FillProgress::default();
            }
            Some(current) if self.state.queued < self.state.total => {
                tracing::warn!(
                    id = dda.id,
                    current,
                    remaining = self.state.total - self.state.queued,
                    "previous descriptor is still being queued"
                );
                return FillProgress {
                    remaining_steps: dda.total_steps,
                    blocked: true,
                    ..FillProgress::default()
                };
            }
            _ => {
                self.state.descriptor = Some(dda.id);
                self.state.total = dda.total_steps;
                self.state.queued = 0;
            }
        }

        let mut progress = FillProgress::default();
        while self.state.queued < dda.total_steps {
            let Some(segment) = policy.next_segment(dda, self.state.queued) else {
                break;
            };
            let steps = segment.steps.min(dda.total_steps - self.state.queued);
            if steps == 0 {
                break;
            }
            if self.put(steps, segment.speed).is_err() {
                progress.blocked = true;
                break;
            }
            self.state.queued += steps;
            progress.entries += 1;
            progress.queued_steps += steps;
        }
        progress.remaining_steps = dda.total_steps.saturating_sub(self.state.queued);

        if progress.entries > 0 {
            tracing::debug!(
                id = dda.id,
                entries = progress.entries,
                remaining = progress.remaining_steps,
                "filled planner queue"
            );
        }
        progress
    }
}
