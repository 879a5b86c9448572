// krusty_mcu::planner::engine - per-step interval generation for the step interrupt

use super::accel::{AccelTable, Q824};
use super::queue::MoveQueue;
use super::{apply_delta, EngineState, PlannerConfig};
use crate::dda::MotionDescriptor;

/// Interrupt half of the planner.
///
/// Each [`get`](Consumer::get) emits one step: it accounts the time since the
/// previous step, runs at most one quantum update of `curr_c`, takes the step
/// out of the head slot and returns the interval until the next one.
#[derive(Debug)]
pub struct Consumer<'a, 't> {
    config: &'a PlannerConfig,
    table: &'a AccelTable<'t>,
    queue: &'a MoveQueue,
    state: &'a mut EngineState,
}

impl<'a, 't> Consumer<'a, 't> {
    pub(crate) fn new(
        config: &'a PlannerConfig,
        table: &'a AccelTable<'t>,
        queue: &'a MoveQueue,
        state: &'a mut EngineState,
    ) -> Self {
        Self {
            config,
            table,
            queue,
            state,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn queue(&self) -> &'a MoveQueue {
        self.queue
    }

    /// A segment is loaded and steps are flowing.
    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn curr_c(&self) -> u32 {
        self.state.curr_c
    }

    pub fn end_c(&self) -> u32 {
        self.state.end_c
    }

    pub fn position(&self) -> u32 {
        self.state.position
    }

    pub fn velocity(&self) -> u32 {
        self.state.velocity
    }

    pub fn accel_per_tick(&self) -> Q824 {
        self.state.accel_per_tick
    }

    pub fn is_accelerating(&self) -> bool {
        self.state.accel
    }

    pub fn is_cruising(&self) -> bool {
        self.state.cruise
    }

    /// Starts step emission for `dda`. From rest the interval is seeded from
    /// the descriptor's start speed; a move that follows straight on from the
    /// previous one keeps its current interval. Returns whether a segment is
    /// ready to step.
    pub fn begin_dda(&mut self, dda: &MotionDescriptor) -> bool {
        if !self.state.active {
            let s = &mut *self.state;
            s.curr_c = dda.start_c.max(self.config.min_c);
            s.velocity = 0;
            s.remainder = 0;
            s.quantum_steps = 0;
            s.accel_carry = 0;
            self.activate();
        }
        tracing::debug!(
            id = dda.id,
            curr_c = self.state.curr_c,
            end_c = self.state.end_c,
            active = self.state.active,
            "begin dda"
        );
        self.state.active
    }

    /// Interval in timer ticks until the step after this one, or `None` when
    /// nothing is queued and no step may be emitted.
    pub fn get(&mut self, clip_cruise: bool) -> Option<u32> {
        if !self.state.active && !self.activate() {
            return None;
        }

        self.state.quantum_steps = self.state.quantum_steps.saturating_add(1);
        self.update_velocity(clip_cruise);
        let interval = self.state.curr_c;
        self.state.position = self.state.position.wrapping_add(1);

        if self.queue.take_step() == Some(0) {
            self.activate();
        }
        Some(interval)
    }

    /// Loads the head slot's delta into `end_c` and picks the ramp direction.
    /// Leaves `curr_c` alone so there is no jump across the boundary.
    fn activate(&mut self) -> bool {
        let Some((steps, dc)) = self.queue.front() else {
            self.state.active = false;
            return false;
        };
        let s = &mut *self.state;
        s.end_c = apply_delta(s.end_c, dc);
        let target = s.end_c.max(self.config.min_c);
        s.cruise = dc == 0 || target == s.curr_c;
        s.accel = !s.cruise && target < s.curr_c;
        s.active = true;
        tracing::trace!(steps, dc, curr_c = s.curr_c, end_c = s.end_c, accel = s.accel, "segment active");
        true
    }

    fn update_velocity(&mut self, clip_cruise: bool) {
        let quantum = self.config.quantum();
        let min_c = self.config.min_c;
        let s = &mut *self.state;

        s.remainder = s.remainder.saturating_add(s.curr_c);
        if s.remainder < quantum {
            return;
        }
        // At most one update per step; steps slower than a quantum drop the excess.
        s.remainder = (s.remainder - quantum).min(quantum - 1);
        s.velocity = s.quantum_steps;
        s.quantum_steps = 0;

        if s.cruise {
            return;
        }
        s.accel_per_tick = self.table.lookup(s.velocity);
        // A fraction left over from a ramp the other way does not carry.
        if s.carry_accel != s.accel {
            s.accel_carry = 0;
            s.carry_accel = s.accel;
        }
        let (delta, carry) = s.accel_per_tick.step(s.accel_carry);
        s.accel_carry = carry;
        if delta == 0 {
            return;
        }

        let target = s.end_c.max(min_c);
        let next = if s.accel {
            match s.curr_c.checked_sub(delta) {
                Some(c) => c,
                None => {
                    tracing::warn!(curr_c = s.curr_c, delta, "interval underflow clamped");
                    0
                }
            }
        } else {
            match s.curr_c.checked_add(delta) {
                Some(c) => c,
                None => {
                    tracing::warn!(curr_c = s.curr_c, delta, "interval overflow clamped");
                    u32::MAX
                }
            }
        };

        let crossed = if s.accel { next <= target } else { next >= target };
        let clamped = if crossed && clip_cruise { target } else { next };
        s.curr_c = clamped.max(min_c);
        if crossed {
            s.cruise = true;
            s.accel = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::planner::accel::{AccelTable, Q824};
    use crate::planner::{MovePlanner, PlannerConfig};
    use crate::MotionDescriptor;

    static SIX: [u32; 1] = [Q824::from_ticks(6).to_bits()];
    static TEN: [u32; 1] = [Q824::from_ticks(10).to_bits()];
    static HUGE: [u32; 1] = [Q824::from_ticks(1000).to_bits()];

    // tick_time 1 gives a quantum of 2 ticks, so every step runs one update.
    fn every_step(idle_c: u32, min_c: u32, table: &'static [u32]) -> MovePlanner<'static> {
        let config = PlannerConfig { tick_time: 1, min_c, idle_c };
        MovePlanner::new(config, AccelTable::new(table).unwrap()).unwrap()
    }

    #[test]
    fn empty_planner_emits_nothing() {
        let mut planner = every_step(1000, 1, &SIX);
        assert_eq!(planner.get(true), None);
        assert_eq!(planner.get(false), None);
        assert_eq!(planner.snapshot().position, 0);
        assert_eq!(planner.snapshot().curr_c, 1000);
    }

    #[test]
    fn thousand_steps_drain_one_slot() {
        let mut planner = MovePlanner::new(PlannerConfig::default(), AccelTable::new(&SIX).unwrap()).unwrap();
        planner.put(1000, 500).unwrap();
        assert!(!planner.is_empty());

        for call in 1..=1000u32 {
            let head = planner.snapshot().head as usize;
            assert_eq!(planner.snapshot().next_n[head], 1001 - call);
            assert!(planner.get(true).is_some(), "call {call} found the queue empty");
        }
        assert!(planner.is_empty());
        assert_eq!(planner.get(true), None);
        assert_eq!(planner.snapshot().position, 1000);
    }

    #[test]
    fn zero_delta_segment_cruises() {
        let mut planner = every_step(2_500, 1, &HUGE);
        planner.put(300, 2_500).unwrap();
        assert_eq!(planner.snapshot().next_dc[0], 0);
        for _ in 0..300 {
            assert_eq!(planner.get(true), Some(2_500));
        }
        assert!(planner.is_empty());
    }

    #[test]
    fn acceleration_reaches_target_and_clips() {
        let mut planner = every_step(1000, 1, &SIX);
        planner.put(500, 300).unwrap();
        // ceil(700 / 6) = 117 updates.
        let intervals: Vec<u32> = (0..500).map(|_| planner.get(true).unwrap()).collect();
        assert_eq!(intervals[0], 994);
        assert_eq!(intervals[115], 304);
        assert_eq!(intervals[116], 300);
        assert!(intervals.windows(2).all(|w| w[1] <= w[0]));
        assert!(intervals[116..].iter().all(|&c| c == 300));
    }

    #[test]
    fn unclipped_overshoot_stays_within_one_update() {
        let mut planner = every_step(1000, 1, &SIX);
        planner.put(500, 300).unwrap();
        let intervals: Vec<u32> = (0..500).map(|_| planner.get(false).unwrap()).collect();
        assert_eq!(intervals[115], 304);
        assert_eq!(intervals[116], 298);
        assert!(intervals[116..].iter().all(|&c| c == 298));
        assert!(300 - intervals[499] < 6);
    }

    #[test]
    fn deceleration_slows_to_target() {
        let mut planner = every_step(300, 1, &TEN);
        planner.put(200, 2_000).unwrap();
        let intervals: Vec<u32> = (0..200).map(|_| planner.get(true).unwrap()).collect();
        assert_eq!(intervals[0], 310);
        assert_eq!(intervals[169], 2_000);
        assert!(intervals.windows(2).all(|w| w[1] >= w[0]));
        assert!(intervals[169..].iter().all(|&c| c == 2_000));
    }

    #[test]
    fn overflow_and_underflow_are_clamped() {
        let mut planner = every_step(u32::MAX - 10, 1, &HUGE);
        planner.put(5, u32::MAX).unwrap();
        assert_eq!(planner.get(false), Some(u32::MAX));
        assert_eq!(planner.get(false), Some(u32::MAX));

        let mut planner = every_step(50, 20, &HUGE);
        planner.put(5, 1).unwrap();
        assert_eq!(planner.get(false), Some(20));
        let mut planner = every_step(50, 20, &HUGE);
        planner.put(5, 1).unwrap();
        assert_eq!(planner.get(true), Some(20));
    }

    #[test]
    fn boundary_keeps_interval_continuous() {
        let mut planner = every_step(1000, 1, &TEN);
        planner.put(20, 600).unwrap();
        planner.put(10, 600).unwrap();
        planner.put(30, 900).unwrap();

        let intervals: Vec<u32> = (0..60).map(|_| planner.get(true).unwrap()).collect();
        assert_eq!(intervals[19], 800);
        // The cruise slot holds whatever the ramp reached.
        assert!(intervals[20..30].iter().all(|&c| c == 800));
        assert_eq!(intervals[30], 810);
        assert!(planner.is_empty());
    }

    #[test]
    fn carry_does_not_leak_into_the_opposite_ramp() {
        // Half a tick per update: every second update moves the interval.
        static HALF: [u32; 1] = [1 << 15];
        let mut planner = every_step(1_000, 1, &HALF);
        planner.put(3, 900).unwrap();
        planner.put(4, 2_000).unwrap();

        let intervals: Vec<u32> = (0..7).map(|_| planner.get(true).unwrap()).collect();
        // Three speed-up updates leave half a tick behind.
        assert_eq!(&intervals[..3], &[1_000, 999, 999]);
        // The slow-down starts from an empty fraction, not from that half tick.
        assert_eq!(&intervals[3..], &[999, 1_000, 1_000, 1_001]);
    }

    #[test]
    fn velocity_counts_steps_per_quantum() {
        let config = PlannerConfig { tick_time: 500, min_c: 1, idle_c: 100 };
        let mut planner = MovePlanner::new(config, AccelTable::new(&SIX).unwrap()).unwrap();
        planner.put(100, 100).unwrap();
        for _ in 0..9 {
            planner.get(true);
        }
        assert_eq!(planner.snapshot().velocity, 0);
        planner.get(true);
        assert_eq!(planner.snapshot().velocity, 10);
        assert_eq!(planner.snapshot().remainder, 0);
    }

    #[test]
    fn begin_dda_seeds_from_rest_only() {
        let mut planner = every_step(10_000, 1, &TEN);
        let first = MotionDescriptor::new(1, 40, 1_000).with_start_c(4_000);
        planner.fill_queue(&first);
        assert!(planner.begin_dda(&first));
        assert_eq!(planner.snapshot().curr_c, 4_000);
        assert_eq!(planner.get(true), Some(3_990));

        // Mid-move the interval is left alone.
        let second = MotionDescriptor::new(2, 10, 1_000).with_start_c(9_000);
        assert!(planner.begin_dda(&second));
        assert_eq!(planner.snapshot().curr_c, 3_990);
    }

    #[test]
    fn begin_dda_without_queued_steps_reports_idle() {
        let mut planner = every_step(10_000, 1, &TEN);
        let dda = MotionDescriptor::new(7, 10, 1_000).with_start_c(5_000);
        assert!(!planner.begin_dda(&dda));
        assert_eq!(planner.snapshot().curr_c, 5_000);
        assert_eq!(planner.get(true), None);
    }

    #[test]
    fn split_halves_share_the_queue() {
        let mut planner = every_step(1000, 1, &TEN);
        let (mut producer, mut consumer) = planner.split();
        producer.put(3, 900).unwrap();
        assert!(!consumer.is_empty());
        assert_eq!(consumer.get(true), Some(990));
        assert!(consumer.is_accelerating());
        assert_eq!(consumer.get(true), Some(980));
        assert_eq!(consumer.get(true), Some(970));
        assert!(producer.is_empty());
        assert!(!consumer.is_active());
    }
}
