// krusty_mcu: firmware-side step timing for the fast axis
//
// The planner here runs on the MCU. The background loop feeds it motion
// descriptors and the step timer interrupt pulls one interval per step out of
// it. The interrupt path never allocates, blocks or uses floating point.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod dda;
pub mod planner;

pub use dda::MotionDescriptor;
pub use planner::accel::{AccelTable, Q824, ACCEL_P_SHIFT};
pub use planner::engine::Consumer;
pub use planner::filler::{FillPolicy, FillProgress, Producer, Segment, SingleFill, TrapezoidFill};
pub use planner::queue::{MoveQueue, QueueFull, PLANNER_QUEUE_SIZE};
pub use planner::{MovePlanner, PlannerConfig, PlannerError, PlannerSnapshot};
