//! Discrete-event simulation of the planner on one fast axis.
//!
//! Two activities share the planner just as they would on the MCU: the step
//! timer interrupt, which pulls one interval per step, and the background fill
//! loop, which tops the queue up whenever it gets a turn. The event queue
//! orders both by timer tick; the fill loop's period carries seeded jitter so a
//! run is reproducible for a given seed.
//!
//! [`run_threaded`] drives the same split halves from two OS threads instead,
//! which exercises the queue's atomics for real.

pub mod event_queue;
pub mod scenario;

use std::sync::atomic::{AtomicBool, Ordering};

use krusty_mcu::{
    AccelTable, Consumer, FillPolicy, MotionDescriptor, MovePlanner, SingleFill, TrapezoidFill,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};
use crate::profile;
use event_queue::{SimClock, SimEventQueue, SimEventType};
use scenario::Scenario;

const RECORD_CHANNEL_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    #[default]
    Trapezoid,
    Single,
}

impl FillMode {
    pub fn policy(self) -> &'static dyn FillPolicy {
        match self {
            FillMode::Trapezoid => &TrapezoidFill,
            FillMode::Single => &SingleFill,
        }
    }
}

/// Simulation parameters, converted to timer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSettings {
    pub clip_cruise: bool,
    pub fill_period: u64,
    pub fill_jitter: u64,
    pub max_time: u64,
    pub seed: u64,
    pub fill_mode: FillMode,
}

impl SimSettings {
    pub fn from_config(config: &Config) -> Self {
        let sim = &config.simulation;
        Self {
            clip_cruise: config.planner.clip_cruise,
            fill_period: config.us_to_ticks(sim.fill_period_us as u64).max(1),
            fill_jitter: config.us_to_ticks(sim.fill_jitter_us as u64),
            max_time: config.us_to_ticks(sim.max_time_ms.saturating_mul(1_000)),
            seed: sim.seed,
            fill_mode: FillMode::Trapezoid,
        }
    }
}

/// One emitted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u64,
    /// Timer tick the step was emitted at.
    pub time: u64,
    /// Ticks until the next step.
    pub interval: u32,
    pub move_id: u32,
    pub velocity: u32,
    pub live_slots: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimReport {
    pub steps: u64,
    pub expected_steps: u64,
    pub elapsed_ticks: u64,
    /// Times the step timer found the queue empty with steps still to come.
    pub underruns: u64,
    /// Fill passes that stopped on a full queue.
    pub queue_full_events: u64,
    pub fill_passes: u64,
    pub min_interval: Option<u32>,
    pub max_interval: Option<u32>,
    pub timed_out: bool,
}

impl SimReport {
    fn record(&mut self, record: &StepRecord) {
        self.steps += 1;
        self.min_interval = Some(self.min_interval.map_or(record.interval, |m| m.min(record.interval)));
        self.max_interval = Some(self.max_interval.map_or(record.interval, |m| m.max(record.interval)));
    }

    /// Every step came out, on time and without starving the timer.
    pub fn is_clean(&self) -> bool {
        !self.timed_out && self.underruns == 0 && self.steps == self.expected_steps
    }
}

/// Step number each move starts at.
fn move_starts(moves: &[MotionDescriptor]) -> Vec<u64> {
    moves
        .iter()
        .scan(0u64, |emitted, m| {
            let start = *emitted;
            *emitted += m.total_steps as u64;
            Some(start)
        })
        .collect()
}

/// Tracks which descriptor the next step belongs to and hands it to
/// `begin_dda` on its first step.
#[derive(Debug)]
struct MoveTracker<'m> {
    moves: &'m [MotionDescriptor],
    starts: Vec<u64>,
    next: usize,
    current_id: u32,
}

impl<'m> MoveTracker<'m> {
    fn new(moves: &'m [MotionDescriptor]) -> Self {
        Self {
            moves,
            starts: move_starts(moves),
            next: 0,
            current_id: 0,
        }
    }

    fn before_step(&mut self, emitted: u64, consumer: &mut Consumer<'_, '_>) {
        while let Some(&start) = self.starts.get(self.next) {
            if start > emitted {
                break;
            }
            let dda = &self.moves[self.next];
            if dda.total_steps > 0 {
                consumer.begin_dda(dda);
                self.current_id = dda.id;
            }
            self.next += 1;
        }
    }
}

pub struct Simulator<'p, 't> {
    planner: &'p mut MovePlanner<'t>,
    settings: SimSettings,
    moves: Vec<MotionDescriptor>,
    events: SimEventQueue,
    clock: SimClock,
    rng: StdRng,
    fill_index: usize,
    timer_armed: bool,
    report: SimReport,
}

impl<'p, 't> Simulator<'p, 't> {
    pub fn new(planner: &'p mut MovePlanner<'t>, settings: SimSettings, moves: Vec<MotionDescriptor>) -> Self {
        let report = SimReport {
            expected_steps: moves.iter().map(|m| m.total_steps as u64).sum(),
            ..Default::default()
        };
        tracing::info!(
            moves = moves.len(),
            expected_steps = report.expected_steps,
            seed = settings.seed,
            "simulator initialized"
        );
        Self {
            planner,
            settings,
            moves,
            events: SimEventQueue::new(),
            clock: SimClock::new(),
            rng: StdRng::seed_from_u64(settings.seed),
            fill_index: 0,
            timer_armed: false,
            report,
        }
    }

    /// Runs until every move has been stepped out, or the time limit passes.
    /// Each emitted step is handed to `sink`.
    pub fn run<F: FnMut(&StepRecord)>(mut self, mut sink: F) -> SimReport {
        let moves = std::mem::take(&mut self.moves);
        let mut tracker = MoveTracker::new(&moves);

        self.events.push(0, SimEventType::FillLoop);
        while let Some(event) = self.events.pop() {
            if event.timestamp > self.settings.max_time {
                tracing::warn!(
                    time = event.timestamp,
                    steps = self.report.steps,
                    expected = self.report.expected_steps,
                    "simulation time limit reached"
                );
                self.report.timed_out = true;
                break;
            }
            self.clock.advance_to(event.timestamp);
            match event.event_type {
                SimEventType::FillLoop => self.fill_pass(&moves),
                SimEventType::StepTimer => self.step(&mut tracker, &mut sink),
            }
        }

        self.report.elapsed_ticks = self.clock.current_time;
        tracing::info!(
            steps = self.report.steps,
            elapsed_ticks = self.report.elapsed_ticks,
            underruns = self.report.underruns,
            queue_full = self.report.queue_full_events,
            "simulation finished"
        );
        self.report
    }

    pub fn run_collect(self) -> (SimReport, Vec<StepRecord>) {
        let mut records = Vec::new();
        let report = self.run(|r| records.push(*r));
        (report, records)
    }

    fn fill_pass(&mut self, moves: &[MotionDescriptor]) {
        self.report.fill_passes += 1;
        let policy = self.settings.fill_mode.policy();
        let (mut producer, _) = self.planner.split();
        while let Some(dda) = moves.get(self.fill_index) {
            let progress = producer.fill_queue_with(dda, policy);
            if progress.is_complete() {
                self.fill_index += 1;
                continue;
            }
            if progress.blocked {
                self.report.queue_full_events += 1;
            }
            break;
        }

        let now = self.clock.current_time;
        if !self.timer_armed && !self.planner.is_empty() {
            self.events.push(now, SimEventType::StepTimer);
            self.timer_armed = true;
        }
        if self.fill_index < moves.len() {
            let jitter = self.rng.random_range(0..=self.settings.fill_jitter);
            self.events
                .push(now + self.settings.fill_period + jitter, SimEventType::FillLoop);
        }
    }

    fn step<F: FnMut(&StepRecord)>(&mut self, tracker: &mut MoveTracker<'_>, sink: &mut F) {
        let now = self.clock.current_time;
        let emitted = self.report.steps;
        let (_, mut consumer) = self.planner.split();
        tracker.before_step(emitted, &mut consumer);

        match consumer.get(self.settings.clip_cruise) {
            Some(interval) => {
                let record = StepRecord {
                    step: emitted,
                    time: now,
                    interval,
                    move_id: tracker.current_id,
                    velocity: consumer.velocity(),
                    live_slots: consumer.queue().live_slots(),
                };
                self.report.record(&record);
                sink(&record);
                self.events.push(now + interval as u64, SimEventType::StepTimer);
            }
            None => {
                self.timer_armed = false;
                if emitted < self.report.expected_steps {
                    self.report.underruns += 1;
                    tracing::debug!(time = now, step = emitted, "planner underrun");
                }
            }
        }
    }
}

/// Runs the fill loop and the step loop on two OS threads over the split
/// planner. Records reach `sink` on the calling thread through a bounded
/// channel. Time is virtual: `elapsed_ticks` is the sum of emitted intervals.
pub fn run_threaded<F: FnMut(&StepRecord)>(
    planner: &mut MovePlanner<'_>,
    moves: &[MotionDescriptor],
    settings: &SimSettings,
    mut sink: F,
) -> SimReport {
    let mut report = SimReport {
        expected_steps: moves.iter().map(|m| m.total_steps as u64).sum(),
        ..Default::default()
    };
    let expected = report.expected_steps;
    let fill_mode = settings.fill_mode;
    let clip_cruise = settings.clip_cruise;
    let fill_done = AtomicBool::new(false);
    let fill_done = &fill_done;
    let (tx, rx) = crossbeam_channel::bounded::<StepRecord>(RECORD_CHANNEL_DEPTH);
    let (mut producer, mut consumer) = planner.split();

    let (fill_stats, step_stats) = std::thread::scope(|scope| {
        let fill = scope.spawn(move || {
            let policy = fill_mode.policy();
            let mut passes = 0u64;
            let mut full = 0u64;
            for dda in moves {
                loop {
                    passes += 1;
                    let progress = producer.fill_queue_with(dda, policy);
                    if progress.is_complete() {
                        break;
                    }
                    if progress.blocked {
                        full += 1;
                    }
                    std::thread::yield_now();
                }
            }
            fill_done.store(true, Ordering::Release);
            (passes, full)
        });

        let step = scope.spawn(move || {
            let mut tracker = MoveTracker::new(moves);
            let mut emitted = 0u64;
            let mut time = 0u64;
            let mut underruns = 0u64;
            let mut starved = false;
            while emitted < expected {
                tracker.before_step(emitted, &mut consumer);
                match consumer.get(clip_cruise) {
                    Some(interval) => {
                        starved = false;
                        let record = StepRecord {
                            step: emitted,
                            time,
                            interval,
                            move_id: tracker.current_id,
                            velocity: consumer.velocity(),
                            live_slots: consumer.queue().live_slots(),
                        };
                        time += interval as u64;
                        emitted += 1;
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    None => {
                        if !starved {
                            underruns += 1;
                            starved = true;
                        }
                        if fill_done.load(Ordering::Acquire) && consumer.is_empty() {
                            tracing::error!(emitted, expected, "fill loop finished but steps are missing");
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            }
            (underruns, time)
        });

        for record in rx.iter() {
            report.record(&record);
            sink(&record);
        }
        let fill_stats = fill.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
        let step_stats = step.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
        (fill_stats, step_stats)
    });

    (report.fill_passes, report.queue_full_events) = fill_stats;
    (report.underruns, report.elapsed_ticks) = step_stats;
    tracing::info!(
        steps = report.steps,
        elapsed_ticks = report.elapsed_ticks,
        underruns = report.underruns,
        queue_full = report.queue_full_events,
        "threaded simulation finished"
    );
    report
}

/// Builds a planner from `config` and runs `scenario` on it, either as a
/// discrete-event simulation or on two threads.
pub fn run_scenario(
    config: &Config,
    scenario: &Scenario,
    threaded: bool,
) -> Result<(SimReport, Vec<StepRecord>), ConfigError> {
    config.validate()?;
    let table = profile::accel_table(config)?;
    let mut planner = MovePlanner::new(config.to_planner_config()?, AccelTable::new(&table)?)?;
    let settings = SimSettings {
        fill_mode: scenario.fill_mode,
        ..SimSettings::from_config(config)
    };
    tracing::info!(scenario = scenario.name.as_str(), threaded, "running scenario");

    if threaded {
        let mut records = Vec::new();
        let report = run_threaded(&mut planner, &scenario.moves, &settings, |r| records.push(*r));
        Ok((report, records))
    } else {
        Ok(Simulator::new(&mut planner, settings, scenario.moves.clone()).run_collect())
    }
}
