// krusty_mcu::planner::accel - Q8.24 acceleration lookup

use super::PlannerError;

/// Fractional bits of a Q8.24 value that reach the interval update. One timer
/// tick of interval change per quantum is `1 << ACCEL_P_SHIFT`.
pub const ACCEL_P_SHIFT: u32 = 16;

const CARRY_MASK: u32 = (1 << ACCEL_P_SHIFT) - 1;

/// Unsigned Q8.24 fixed-point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Q824(u32);

impl Q824 {
    pub const ZERO: Self = Self(0);
    pub const FRAC_BITS: u32 = 24;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// Whole ticks of interval change per quantum, saturating.
    pub const fn from_ticks(ticks: u32) -> Self {
        Self(ticks.saturating_mul(1 << ACCEL_P_SHIFT))
    }

    /// Splits one quantum's worth of change into whole ticks, folding in the
    /// fraction left over from the previous quantum. Returns the ticks and the
    /// fraction to carry into the next call.
    pub const fn step(self, carry: u32) -> (u32, u32) {
        let total = self.0 as u64 + (carry & CARRY_MASK) as u64;
        ((total >> ACCEL_P_SHIFT) as u32, (total as u32) & CARRY_MASK)
    }
}

/// Read-only acceleration table, indexed by fast-axis speed in steps per
/// quantum. The backing slice is usually a `static` living in flash.
#[derive(Debug, Clone, Copy)]
pub struct AccelTable<'t> {
    entries: &'t [u32],
}

impl<'t> AccelTable<'t> {
    /// Wraps a table of Q8.24 entries. The table must be non-empty and
    /// monotonic, rising or falling.
    pub fn new(entries: &'t [u32]) -> Result<Self, PlannerError> {
        if entries.is_empty() {
            return Err(PlannerError::EmptyAccelTable);
        }
        if let Some(index) = first_reversal(entries) {
            return Err(PlannerError::NonMonotonicAccelTable { index });
        }
        Ok(Self { entries })
    }

    /// Acceleration for the given speed. Speeds past the end of the table use
    /// the last entry.
    #[inline]
    pub fn lookup(&self, velocity: u32) -> Q824 {
        let last = self.entries.len() - 1;
        Q824(self.entries[(velocity as usize).min(last)])
    }

    pub fn entries(&self) -> &'t [u32] {
        self.entries
    }
}

fn first_reversal(entries: &[u32]) -> Option<usize> {
    let mut rising = false;
    let mut falling = false;
    for (i, pair) in entries.windows(2).enumerate() {
        if pair[1] > pair[0] {
            rising = true;
        } else if pair[1] < pair[0] {
            falling = true;
        }
        if rising && falling {
            return Some(i + 1);
        }
    }
    None
}
