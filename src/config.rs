//! # Planner and simulation configuration
//!
//! Physical limits live in the TOML file; everything the planner core sees is
//! derived from them in timer ticks.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [planner]
//! f_cpu = 16000000
//! tick_time_us = 2000
//! max_step_rate = 20000
//! idle_step_rate = 2000
//! clip_cruise = true
//!
//! [axis]
//! steps_per_mm = 80.0
//! max_accel = 3000.0
//! max_feedrate = 200.0
//!
//! [accel_table]
//! entries = 64
//! torque_falloff = 0.3
//!
//! [simulation]
//! seed = 7
//! fill_period_us = 500
//! fill_jitter_us = 200
//!
//! [[simulation.moves]]
//! distance_mm = 40.0
//! feedrate = 150.0
//! ```
//!
//! Every section and field is optional and falls back to the defaults below.

// src/config.rs - Single configuration file
use std::path::Path;

use ::config as config_rs;
use krusty_mcu::{PlannerConfig, PlannerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config source error: {0}")]
    Source(#[from] config_rs::ConfigError),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid planner setup: {0}")]
    Planner(#[from] PlannerError),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub axis: AxisConfig,
    #[serde(default)]
    pub accel_table: AccelTableConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Timer and speed limits of the step generator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlannerSection {
    /// Timer clock in Hz. One tick is `1 / f_cpu` seconds.
    #[serde(default = "default_f_cpu")]
    pub f_cpu: u32,
    /// Base tick period (TICK_TIME). The velocity quantum is twice this.
    #[serde(default = "default_tick_time_us")]
    pub tick_time_us: u32,
    /// Fastest step rate in steps/s.
    #[serde(default = "default_max_step_rate")]
    pub max_step_rate: u32,
    /// Step rate every move starts from and stops at, in steps/s. Below two
    /// steps per quantum the planner cannot tell speeds apart.
    #[serde(default = "default_idle_step_rate")]
    pub idle_step_rate: u32,
    #[serde(default = "default_clip_cruise")]
    pub clip_cruise: bool,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            f_cpu: default_f_cpu(),
            tick_time_us: default_tick_time_us(),
            max_step_rate: default_max_step_rate(),
            idle_step_rate: default_idle_step_rate(),
            clip_cruise: default_clip_cruise(),
        }
    }
}

/// The fast axis in physical units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AxisConfig {
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: f64,
    /// mm/s²
    #[serde(default = "default_max_accel")]
    pub max_accel: f64,
    /// mm/s
    #[serde(default = "default_max_feedrate")]
    pub max_feedrate: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            max_accel: default_max_accel(),
            max_feedrate: default_max_feedrate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccelTableConfig {
    /// Number of generated entries, one per steps-per-quantum value.
    #[serde(default = "default_table_entries")]
    pub entries: usize,
    /// Fraction of acceleration lost at the maximum step rate, 0 for none.
    #[serde(default)]
    pub torque_falloff: f64,
    /// Raw Q8.24 entries. When set, nothing is generated.
    #[serde(default)]
    pub table: Option<Vec<u32>>,
}

impl Default for AccelTableConfig {
    fn default() -> Self {
        Self {
            entries: default_table_entries(),
            torque_falloff: 0.0,
            table: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Nominal period of the background fill loop.
    #[serde(default = "default_fill_period_us")]
    pub fill_period_us: u32,
    /// Random extra delay added to each fill pass, up to this much.
    #[serde(default = "default_fill_jitter_us")]
    pub fill_jitter_us: u32,
    /// Simulated time after which a run is abandoned.
    #[serde(default = "default_max_time_ms")]
    pub max_time_ms: u64,
    /// Moves for the `config` scenario.
    #[serde(default)]
    pub moves: Vec<MoveConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            fill_period_us: default_fill_period_us(),
            fill_jitter_us: default_fill_jitter_us(),
            max_time_ms: default_max_time_ms(),
            moves: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MoveConfig {
    pub distance_mm: f64,
    /// mm/s, capped at the axis maximum.
    pub feedrate: f64,
}

fn default_f_cpu() -> u32 { 16_000_000 }
fn default_tick_time_us() -> u32 { 2_000 }
fn default_max_step_rate() -> u32 { 20_000 }
fn default_idle_step_rate() -> u32 { 2_000 }
fn default_clip_cruise() -> bool { true }
fn default_steps_per_mm() -> f64 { 80.0 }
fn default_max_accel() -> f64 { 3_000.0 }
fn default_max_feedrate() -> f64 { 200.0 }
fn default_table_entries() -> usize { 64 }
fn default_seed() -> u64 { 1 }
fn default_fill_period_us() -> u32 { 500 }
fn default_fill_jitter_us() -> u32 { 200 }
fn default_max_time_ms() -> u64 { 60_000 }

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.planner;
        if p.f_cpu == 0 {
            return Err(ConfigError::Invalid("planner.f_cpu must be non-zero".into()));
        }
        if p.tick_time_us == 0 {
            return Err(ConfigError::Invalid("planner.tick_time_us must be non-zero".into()));
        }
        if p.max_step_rate == 0 || p.idle_step_rate == 0 {
            return Err(ConfigError::Invalid("step rates must be non-zero".into()));
        }
        if p.idle_step_rate > p.max_step_rate {
            return Err(ConfigError::Invalid(format!(
                "planner.idle_step_rate {} exceeds planner.max_step_rate {}",
                p.idle_step_rate, p.max_step_rate
            )));
        }
        for (name, value) in [
            ("axis.steps_per_mm", self.axis.steps_per_mm),
            ("axis.max_accel", self.axis.max_accel),
            ("axis.max_feedrate", self.axis.max_feedrate),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        let falloff = self.accel_table.torque_falloff;
        if !(0.0..1.0).contains(&falloff) {
            return Err(ConfigError::Invalid(format!(
                "accel_table.torque_falloff must be in [0, 1), got {falloff}"
            )));
        }
        if self.accel_table.table.is_none() && self.accel_table.entries == 0 {
            return Err(ConfigError::Invalid("accel_table.entries must be non-zero".into()));
        }
        if self.simulation.fill_period_us == 0 {
            return Err(ConfigError::Invalid("simulation.fill_period_us must be non-zero".into()));
        }
        for (i, m) in self.simulation.moves.iter().enumerate() {
            if !m.distance_mm.is_finite() || !m.feedrate.is_finite() || m.feedrate <= 0.0 {
                return Err(ConfigError::Invalid(format!("simulation.moves[{i}] is not a valid move")));
            }
        }

        let top_speed = self.axis.max_feedrate * self.axis.steps_per_mm;
        if top_speed > p.max_step_rate as f64 {
            tracing::warn!(
                top_speed,
                max_step_rate = p.max_step_rate,
                "max_feedrate exceeds the step rate limit and will be capped"
            );
        }
        let planner = self.to_planner_config()?;
        if planner.idle_c > planner.quantum() / 2 {
            tracing::warn!(
                idle_c = planner.idle_c,
                quantum = planner.quantum(),
                "idle rate is under two steps per quantum, ramps from rest will be coarse"
            );
        }
        Ok(())
    }

    /// Converts microseconds to timer ticks.
    pub fn us_to_ticks(&self, us: u64) -> u64 {
        us.saturating_mul(self.planner.f_cpu as u64) / 1_000_000
    }

    /// Step interval in ticks for a step rate in steps/s.
    pub fn rate_to_interval(&self, steps_per_s: f64) -> u32 {
        if steps_per_s <= 0.0 {
            return u32::MAX;
        }
        let c = (self.planner.f_cpu as f64 / steps_per_s).round();
        if c >= u32::MAX as f64 { u32::MAX } else { c as u32 }
    }

    pub fn to_planner_config(&self) -> Result<PlannerConfig, ConfigError> {
        let tick_time = self.us_to_ticks(self.planner.tick_time_us as u64);
        let planner = PlannerConfig {
            tick_time: u32::try_from(tick_time).map_err(|_| {
                ConfigError::Invalid(format!("tick time of {tick_time} ticks does not fit in 32 bits"))
            })?,
            min_c: self.rate_to_interval(self.planner.max_step_rate as f64),
            idle_c: self.rate_to_interval(self.planner.idle_step_rate as f64),
        };
        planner.validate()?;
        Ok(planner)
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}

/// Loads an optional TOML file and layers `key=value` overrides on top, e.g.
/// `("axis.max_accel", "2500")`. Values are strings and are converted to the
/// field's type on deserialization.
pub fn load_config_with_overrides(
    path: Option<&Path>,
    overrides: &[(String, String)],
) -> Result<Config, ConfigError> {
    let mut builder = config_rs::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config_rs::File::from(path).format(config_rs::FileFormat::Toml));
    }
    for (key, value) in overrides {
        tracing::debug!(key = key.as_str(), value = value.as_str(), "config override");
        builder = builder.set_override(key.as_str(), value.as_str())?;
    }
    let config: Config = builder.build()?.try_deserialize().map_err(|e| {
        tracing::error!("Failed to apply config overrides: {}", e);
        ConfigError::Source(e)
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.planner.f_cpu, 16_000_000);
        assert_eq!(config.planner.tick_time_us, 2_000);
        assert!(config.planner.clip_cruise);
        assert_eq!(config.axis.steps_per_mm, 80.0);
        assert_eq!(config.planner.idle_step_rate, 2_000);
        assert_eq!(config.accel_table.entries, 64);
        assert!(config.simulation.moves.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_core_defaults() {
        let planner = Config::default().to_planner_config().unwrap();
        assert_eq!(planner, PlannerConfig::default());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("planner.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[axis]\nsteps_per_mm = 160.0\n\n[planner]\nclip_cruise = false").unwrap();
        file.flush().unwrap();
        let config = load_config(&file_path).unwrap();
        assert_eq!(config.axis.steps_per_mm, 160.0);
        assert!(!config.planner.clip_cruise);
        // Defaults for missing fields
        assert_eq!(config.axis.max_accel, 3_000.0);
        assert_eq!(config.planner.max_step_rate, 20_000);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("nonexistent_file.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(&file_path);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_moves_and_explicit_table() {
        let toml = r#"
        [accel_table]
        table = [300, 200, 100]

        [[simulation.moves]]
        distance_mm = 10.0
        feedrate = 50.0

        [[simulation.moves]]
        distance_mm = -5.0
        feedrate = 20.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.accel_table.table.as_deref(), Some(&[300, 200, 100][..]));
        assert_eq!(config.simulation.moves.len(), 2);
        assert_eq!(config.simulation.moves[1].distance_mm, -5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_layer_on_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("planner.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[axis]\nmax_accel = 1500.0\nmax_feedrate = 100.0").unwrap();
        file.flush().unwrap();

        let overrides = vec![
            ("axis.max_accel".to_string(), "2500".to_string()),
            ("planner.max_step_rate".to_string(), "40000".to_string()),
            ("planner.clip_cruise".to_string(), "false".to_string()),
        ];
        let config = load_config_with_overrides(Some(&file_path), &overrides).unwrap();
        assert_eq!(config.axis.max_accel, 2_500.0);
        assert_eq!(config.axis.max_feedrate, 100.0);
        assert_eq!(config.planner.max_step_rate, 40_000);
        assert!(!config.planner.clip_cruise);
        assert_eq!(config.planner.tick_time_us, 2_000);
    }

    #[test]
    fn test_overrides_without_file() {
        let overrides = vec![("simulation.seed".to_string(), "99".to_string())];
        let config = load_config_with_overrides(None, &overrides).unwrap();
        assert_eq!(config.simulation.seed, 99);
        assert_eq!(config.axis, AxisConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.planner.idle_step_rate = 50_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.axis.max_accel = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.accel_table.torque_falloff = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // A 1 MHz timer at 4 MHz steps rounds the interval down to zero.
        let mut config = Config::default();
        config.planner.f_cpu = 1_000_000;
        config.planner.max_step_rate = 4_000_000;
        config.planner.idle_step_rate = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Planner(PlannerError::ZeroMinInterval))
        ));
    }

    #[test]
    fn test_unit_conversions() {
        let config = Config::default();
        assert_eq!(config.us_to_ticks(2_000), 32_000);
        assert_eq!(config.rate_to_interval(20_000.0), 800);
        assert_eq!(config.to_planner_config().unwrap().idle_c, 8_000);
        assert_eq!(config.rate_to_interval(0.0), u32::MAX);
        assert_eq!(config.rate_to_interval(1e-9), u32::MAX);
    }
}
