//! Built-in move sequences for the harness and the integration tests.

use krusty_mcu::MotionDescriptor;

use super::FillMode;
use crate::config::{Config, ConfigError};
use crate::profile::MoveProfiler;

/// Name and one-line description of every built-in scenario.
pub const SCENARIOS: &[(&str, &str)] = &[
    ("single_move", "one 50 mm move at the axis feedrate limit"),
    ("back_to_back", "five 20 mm moves at mixed feedrates"),
    ("short_moves", "forty 0.5 mm moves that never reach the feedrate"),
    ("cruise_only", "three 10 mm moves queued whole, one entry each"),
    ("config", "the [[simulation.moves]] list from the config file"),
];

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub fill_mode: FillMode,
    pub moves: Vec<MotionDescriptor>,
}

impl Scenario {
    pub fn total_steps(&self) -> u64 {
        self.moves.iter().map(|m| m.total_steps as u64).sum()
    }
}

/// Plans the named scenario against `config`. `Ok(None)` for a name that is
/// not in [`SCENARIOS`].
pub fn build_scenario(name: &str, config: &Config) -> Result<Option<Scenario>, ConfigError> {
    let profiler = MoveProfiler::new(config)?;
    let top = config.axis.max_feedrate;
    let (fill_mode, moves) = match name {
        "single_move" => (FillMode::Trapezoid, vec![profiler.plan_move(1, 50.0, top)]),
        "back_to_back" => {
            let moves = [0.25, 0.6, 1.0, 0.4, 0.8]
                .iter()
                .zip(1u32..)
                .map(|(scale, id)| profiler.plan_move(id, 20.0, top * scale))
                .collect();
            (FillMode::Trapezoid, moves)
        }
        "short_moves" => {
            let moves = (1..=40u32).map(|id| profiler.plan_move(id, 0.5, top)).collect();
            (FillMode::Trapezoid, moves)
        }
        "cruise_only" => {
            let moves = (1..=3u32).map(|id| profiler.plan_move(id, 10.0, top * 0.5)).collect();
            (FillMode::Single, moves)
        }
        "config" => (FillMode::Trapezoid, profiler.plan_config_moves()),
        _ => return Ok(None),
    };
    Ok(Some(Scenario {
        name: name.to_string(),
        fill_mode,
        moves,
    }))
}
