//! Acceleration tables and move profiles from physical axis limits.
//!
//! The step interrupt only ever sees ticks. This is where mm, mm/s and mm/s²
//! get turned into a Q8.24 table indexed by steps per quantum, and into
//! trapezoid descriptors for the fill loop.
//!
//! At `n` steps per quantum `Tq` the interval is `F·Tq / n` ticks, where `F`
//! is the timer clock. One quantum of acceleration `a` adds `a·Tq²` steps per
//! quantum, so the interval shrinks by `F·Tq/n - F·Tq/(n + a·Tq²)`.
//!
//! Ramp lengths are not taken from `v² / 2a`. The interrupt only sees whole
//! steps per quantum, so [`MoveProfiler`] runs the planner core over the
//! table and counts how many steps each ramp really takes.

use krusty_mcu::{AccelTable, MotionDescriptor, MovePlanner, PlannerConfig, ACCEL_P_SHIFT};

use crate::config::{Config, ConfigError};

/// The table to run with: the explicit one from the config if present,
/// otherwise one generated from the axis limits. Either way it is checked the
/// same way the planner checks it.
pub fn accel_table(config: &Config) -> Result<Vec<u32>, ConfigError> {
    let table = match &config.accel_table.table {
        Some(table) => table.clone(),
        None => build_accel_table(config),
    };
    AccelTable::new(&table)?;
    Ok(table)
}

pub fn build_accel_table(config: &Config) -> Vec<u32> {
    let f_cpu = config.planner.f_cpu as f64;
    let quantum_s = 2.0 * config.planner.tick_time_us as f64 / 1e6;
    let accel = config.axis.max_accel * config.axis.steps_per_mm;
    let max_rate = config.planner.max_step_rate as f64;
    let falloff = config.accel_table.torque_falloff;
    let scale = (1u64 << ACCEL_P_SHIFT) as f64;

    let table: Vec<u32> = (0..config.accel_table.entries)
        .map(|i| {
            // Velocity 0 never reaches the lookup; reuse the first real entry.
            let n = i.max(1) as f64;
            let rate = n / quantum_s;
            let derate = (1.0 - falloff * (rate / max_rate).min(1.0)).max(0.0);
            let gain = accel * derate * quantum_s * quantum_s;
            let interval = f_cpu * quantum_s / n;
            let ticks = interval - f_cpu * quantum_s / (n + gain);
            // The count reads n for intervals down to F·Tq/(n + 1); one update
            // must never take more than that.
            let cap = f_cpu * quantum_s / (n + 1.0);
            saturate(ticks.min(cap) * scale)
        })
        .collect();
    tracing::debug!(
        entries = table.len(),
        first = table.first().copied(),
        last = table.last().copied(),
        "generated acceleration table"
    );
    table
}

fn saturate(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= u32::MAX as f64 {
        u32::MAX
    } else {
        value.round() as u32
    }
}

/// Plans moves against the table and timing the planner will run with.
#[derive(Debug, Clone)]
pub struct MoveProfiler<'c> {
    config: &'c Config,
    planner: PlannerConfig,
    table: Vec<u32>,
}

impl<'c> MoveProfiler<'c> {
    pub fn new(config: &'c Config) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            planner: config.to_planner_config()?,
            table: accel_table(config)?,
        })
    }

    pub fn table(&self) -> &[u32] {
        &self.table
    }

    /// Steps the planner core needs to take its interval from `from_c` to
    /// `to_c`, starting from rest, counting the step that arrives. Gives up at
    /// `limit`.
    pub fn ramp_steps(&self, from_c: u32, to_c: u32, limit: u32) -> u32 {
        if from_c == to_c || limit == 0 {
            return 0;
        }
        let config = PlannerConfig { idle_c: from_c, ..self.planner };
        let Ok(table) = AccelTable::new(&self.table) else {
            return limit;
        };
        let Ok(mut planner) = MovePlanner::new(config, table) else {
            return limit;
        };
        if planner.put(limit, to_c).is_err() {
            return limit;
        }
        let (_, mut consumer) = planner.split();
        for step in 1..=limit {
            if consumer.get(true).is_none() {
                break;
            }
            if consumer.is_cruising() {
                return step;
            }
        }
        limit
    }

    /// Plans one move on the fast axis as a trapezoid from rest to rest. A
    /// move too short to reach `feedrate` peaks at the fastest interval whose
    /// two ramps still fit. Moves slower than the idle rate run flat.
    pub fn plan_move(&self, id: u32, distance_mm: f64, feedrate: f64) -> MotionDescriptor {
        let config = self.config;
        let steps_per_mm = config.axis.steps_per_mm;
        let total_steps = saturate((distance_mm * steps_per_mm).abs());
        let idle_rate = config.planner.idle_step_rate as f64;
        let rate = (feedrate.min(config.axis.max_feedrate) * steps_per_mm)
            .min(config.planner.max_step_rate as f64);

        if rate <= idle_rate {
            return MotionDescriptor::new(id, total_steps, config.rate_to_interval(rate));
        }

        let idle_c = self.planner.idle_c;
        let ramps = |peak_c: u32| {
            (
                self.ramp_steps(idle_c, peak_c, total_steps),
                self.ramp_steps(peak_c, idle_c, total_steps),
            )
        };
        let fits = |(up, down): (u32, u32)| up.saturating_add(down) <= total_steps;

        let mut peak_c = config.rate_to_interval(rate);
        let mut phases = ramps(peak_c);
        if !fits(phases) {
            // Slower peaks need shorter ramps; find the fastest one that fits.
            let (mut fast, mut slow) = (peak_c, idle_c);
            while slow - fast > 1 {
                let mid = fast + (slow - fast) / 2;
                if fits(ramps(mid)) {
                    slow = mid;
                } else {
                    fast = mid;
                }
            }
            peak_c = slow;
            phases = ramps(peak_c);
        }

        let (up, down) = phases;
        let dda = MotionDescriptor::new(id, total_steps, peak_c)
            .with_start_c(idle_c)
            .with_end_c(idle_c)
            .with_ramps(up, down);
        tracing::debug!(
            id,
            total_steps,
            rampup = up,
            rampdown = down,
            cruise_c = dda.cruise_c,
            "planned move"
        );
        dda
    }

    /// Plans every `[[simulation.moves]]` entry, numbering them from 1.
    pub fn plan_config_moves(&self) -> Vec<MotionDescriptor> {
        self.config
            .simulation
            .moves
            .iter()
            .zip(1u32..)
            .map(|(m, id)| self.plan_move(id, m.distance_mm, m.feedrate))
            .collect()
    }
}
