//! Fast-axis view of a motion descriptor.
//!
//! The command layer hands the planner a finished move: how many fast-axis
//! steps it has, the step interval it starts at, cruises at and ends at, and how
//! many of its steps are spent ramping. All intervals are timer ticks per step.

/// A completed motion descriptor for the fast axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionDescriptor {
    /// Identifies the move. The fill loop uses it to tell a new descriptor
    /// apart from one it has already partly queued.
    pub id: u32,
    pub total_steps: u32,
    /// Interval of the first step when the axis starts from rest.
    pub start_c: u32,
    pub cruise_c: u32,
    pub end_c: u32,
    pub rampup_steps: u32,
    pub rampdown_steps: u32,
}

impl MotionDescriptor {
    /// A constant-speed move with no ramps.
    pub const fn new(id: u32, total_steps: u32, cruise_c: u32) -> Self {
        Self {
            id,
            total_steps,
            start_c: cruise_c,
            cruise_c,
            end_c: cruise_c,
            rampup_steps: 0,
            rampdown_steps: 0,
        }
    }

    pub const fn with_start_c(mut self, start_c: u32) -> Self {
        self.start_c = start_c;
        self
    }

    pub const fn with_end_c(mut self, end_c: u32) -> Self {
        self.end_c = end_c;
        self
    }

    pub const fn with_ramps(mut self, rampup_steps: u32, rampdown_steps: u32) -> Self {
        self.rampup_steps = rampup_steps;
        self.rampdown_steps = rampdown_steps;
        self
    }

    /// Ramp-up, cruise and ramp-down step counts, normalised so they always
    /// add up to `total_steps`. Ramp-up wins when the ramps don't fit.
    pub fn phases(&self) -> (u32, u32, u32) {
        let up = self.rampup_steps.min(self.total_steps);
        let down = self.rampdown_steps.min(self.total_steps - up);
        (up, self.total_steps - up - down, down)
    }

    pub fn cruise_steps(&self) -> u32 {
        self.phases().1
    }
}
