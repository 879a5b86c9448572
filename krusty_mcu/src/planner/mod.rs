//! # Fast-axis move planner
//!
//! Looks a few segments ahead of the step interrupt so that every call from
//! the interrupt is a handful of adds, compares and one table lookup.
//!
//! The planner is one owned value per axis. [`MovePlanner::split`] hands out a
//! [`Producer`] for the background fill loop and a [`Consumer`] for the step
//! timer interrupt. Only the four queue slots are shared between them; every
//! other field belongs to exactly one side and the borrow checker keeps it
//! that way.
//!
//! ```
//! use krusty_mcu::{AccelTable, MotionDescriptor, MovePlanner, PlannerConfig, Q824};
//!
//! static TABLE: [u32; 1] = [Q824::from_ticks(4).to_bits()];
//! let table = AccelTable::new(&TABLE).unwrap();
//! let mut planner = MovePlanner::new(PlannerConfig::default(), table).unwrap();
//!
//! let dda = MotionDescriptor::new(1, 200, 2_000).with_ramps(50, 50).with_end_c(16_000);
//! let (mut producer, mut consumer) = planner.split();
//! producer.fill_queue(&dda);
//! consumer.begin_dda(&dda);
//! while let Some(interval) = consumer.get(true) {
//!     assert!(interval >= 800);
//! }
//! ```

pub mod accel;
pub mod engine;
pub mod filler;
pub mod queue;

use thiserror::Error;

use crate::dda::MotionDescriptor;
use accel::{AccelTable, Q824};
pub use engine::Consumer;
pub use filler::{FillProgress, Producer};
use queue::{MoveQueue, QueueFull};

/// Timer ticks at 16 MHz: TICK_TIME is 2 ms.
pub const DEFAULT_TICK_TIME: u32 = 32_000;
/// Fastest interval the step pulse generator can keep up with.
pub const DEFAULT_MIN_C: u32 = 800;
/// Interval the axis starts from and returns to when at rest.
pub const DEFAULT_IDLE_C: u32 = 8_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error("tick time must be non-zero")]
    ZeroTickTime,
    #[error("minimum step interval must be non-zero")]
    ZeroMinInterval,
    #[error("idle interval {idle_c} is faster than the minimum interval {min_c}")]
    IdleFasterThanMin { idle_c: u32, min_c: u32 },
    #[error("acceleration table is empty")]
    EmptyAccelTable,
    #[error("acceleration table changes direction at entry {index}")]
    NonMonotonicAccelTable { index: usize },
}

/// Timing constants for one axis, all in timer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Period of the base timer tick (TICK_TIME).
    pub tick_time: u32,
    /// Shortest interval between two steps.
    pub min_c: u32,
    /// Interval of an axis at rest.
    pub idle_c: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tick_time: DEFAULT_TICK_TIME,
            min_c: DEFAULT_MIN_C,
            idle_c: DEFAULT_IDLE_C,
        }
    }
}

impl PlannerConfig {
    /// Period over which a new velocity is computed.
    pub const fn quantum(&self) -> u32 {
        self.tick_time.saturating_mul(2)
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.tick_time == 0 {
            return Err(PlannerError::ZeroTickTime);
        }
        if self.min_c == 0 {
            return Err(PlannerError::ZeroMinInterval);
        }
        if self.idle_c < self.min_c {
            return Err(PlannerError::IdleFasterThanMin {
                idle_c: self.idle_c,
                min_c: self.min_c,
            });
        }
        Ok(())
    }
}

/// Moves an interval by a signed delta without wrapping. The producer and the
/// consumer both walk the delta chain through this, so they agree on every
/// planned interval.
#[inline]
pub(crate) const fn apply_delta(c: u32, delta: i32) -> u32 {
    if delta < 0 {
        c.saturating_sub(delta.unsigned_abs())
    } else {
        c.saturating_add(delta as u32)
    }
}

/// Signed delta from one interval to another, saturated to `i32`.
#[inline]
pub(crate) const fn speed_delta(from: u32, to: u32) -> i32 {
    let diff = to as i64 - from as i64;
    if diff > i32::MAX as i64 {
        i32::MAX
    } else if diff < i32::MIN as i64 {
        i32::MIN
    } else {
        diff as i32
    }
}

/// State owned by the step interrupt.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineState {
    pub position: u32,
    pub velocity: u32,
    pub remainder: u32,
    pub accel_per_tick: Q824,
    pub curr_c: u32,
    pub end_c: u32,
    pub accel: bool,
    pub cruise: bool,
    /// The head slot has been loaded into `end_c`/`accel`.
    pub active: bool,
    pub quantum_steps: u32,
    pub accel_carry: u32,
    /// Direction `accel_carry` was accumulated in.
    pub carry_accel: bool,
}

impl EngineState {
    const fn at_rest(idle_c: u32) -> Self {
        Self {
            position: 0,
            velocity: 0,
            remainder: 0,
            accel_per_tick: Q824::ZERO,
            curr_c: idle_c,
            end_c: idle_c,
            accel: false,
            cruise: true,
            active: false,
            quantum_steps: 0,
            accel_carry: 0,
            carry_accel: false,
        }
    }
}

/// State owned by the background fill loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FillState {
    /// Interval the last queued segment ends at.
    pub planned_c: u32,
    pub planned_steps: u64,
    /// Descriptor being queued, its step count and how many of its steps
    /// are in already.
    pub descriptor: Option<u32>,
    pub total: u32,
    pub queued: u32,
}

impl FillState {
    const fn at_rest(idle_c: u32) -> Self {
        Self {
            planned_c: idle_c,
            planned_steps: 0,
            descriptor: None,
            total: 0,
            queued: 0,
        }
    }
}

/// Copy of the planner fields for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerSnapshot {
    pub position: u32,
    pub velocity: u32,
    pub remainder: u32,
    pub accel_per_tick: u32,
    pub curr_c: u32,
    pub end_c: u32,
    pub next_dc: [i32; queue::PLANNER_QUEUE_SIZE],
    pub next_n: [u32; queue::PLANNER_QUEUE_SIZE],
    pub head: u8,
    pub tail: u8,
    pub accel: bool,
    pub planned_c: u32,
}

#[derive(Debug)]
pub struct MovePlanner<'t> {
    config: PlannerConfig,
    table: AccelTable<'t>,
    queue: MoveQueue,
    engine: EngineState,
    fill: FillState,
}

impl<'t> MovePlanner<'t> {
    pub fn new(config: PlannerConfig, table: AccelTable<'t>) -> Result<Self, PlannerError> {
        config.validate()?;
        Ok(Self {
            config,
            table,
            queue: MoveQueue::new(),
            engine: EngineState::at_rest(config.idle_c),
            fill: FillState::at_rest(config.idle_c),
        })
    }

    /// Drops every queued segment and puts the axis back at rest. Also the
    /// way to abort a move in flight.
    pub fn init(&mut self) {
        self.queue.reset();
        self.engine = EngineState::at_rest(self.config.idle_c);
        self.fill = FillState::at_rest(self.config.idle_c);
        tracing::debug!(idle_c = self.config.idle_c, "planner reset");
    }

    /// Splits the planner into its fill-loop half and its interrupt half.
    pub fn split(&mut self) -> (Producer<'_>, Consumer<'_, 't>) {
        let Self {
            config,
            table,
            queue,
            engine,
            fill,
        } = self;
        let queue = &*queue;
        (
            Producer::new(queue, fill),
            Consumer::new(config, table, queue, engine),
        )
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn queue(&self) -> &MoveQueue {
        &self.queue
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Single-context shorthand for [`Consumer::get`].
    pub fn get(&mut self, clip_cruise: bool) -> Option<u32> {
        self.split().1.get(clip_cruise)
    }

    /// Single-context shorthand for [`Producer::put`].
    pub fn put(&mut self, steps: u32, speed: u32) -> Result<(), QueueFull> {
        self.split().0.put(steps, speed)
    }

    /// Single-context shorthand for [`Consumer::begin_dda`].
    pub fn begin_dda(&mut self, dda: &MotionDescriptor) -> bool {
        self.split().1.begin_dda(dda)
    }

    /// Single-context shorthand for [`Producer::fill_queue`].
    pub fn fill_queue(&mut self, dda: &MotionDescriptor) -> FillProgress {
        self.split().0.fill_queue(dda)
    }

    pub fn snapshot(&self) -> PlannerSnapshot {
        let mut next_dc = [0; queue::PLANNER_QUEUE_SIZE];
        let mut next_n = [0; queue::PLANNER_QUEUE_SIZE];
        for i in 0..queue::PLANNER_QUEUE_SIZE {
            let (n, dc) = self.queue.slot(i);
            next_n[i] = n;
            next_dc[i] = dc;
        }
        PlannerSnapshot {
            position: self.engine.position,
            velocity: self.engine.velocity,
            remainder: self.engine.remainder,
            accel_per_tick: self.engine.accel_per_tick.to_bits(),
            curr_c: self.engine.curr_c,
            end_c: self.engine.end_c,
            next_dc,
            next_n,
            head: self.queue.head() as u8,
            tail: self.queue.tail() as u8,
            accel: self.engine.accel,
            planned_c: self.fill.planned_c,
        }
    }
}
