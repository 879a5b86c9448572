// End-to-end tests: config -> acceleration table -> planner -> simulator

use std::fs::File;
use std::io::Write;

use krusty_planner::config::{load_config_with_overrides, Config};
use krusty_planner::simulator::scenario::{build_scenario, SCENARIOS};
use krusty_planner::simulator::{run_scenario, FillMode};
use tempfile::tempdir;

#[test]
fn builtin_scenarios_run_clean_with_defaults() {
    let config = Config::default();
    let planner = config.to_planner_config().unwrap();
    for (name, _) in SCENARIOS {
        let scenario = build_scenario(name, &config).unwrap().unwrap();
        let (report, records) = run_scenario(&config, &scenario, false).unwrap();
        assert!(report.is_clean(), "{name}: {report:?}");
        assert_eq!(report.steps, scenario.total_steps(), "{name}");
        assert_eq!(records.len() as u64, report.steps);
        assert!(records.iter().all(|r| r.interval >= planner.min_c), "{name}");
        assert!(records.iter().all(|r| r.live_slots <= 4), "{name}");
        // Never more than a 2x speed change from one step to the next.
        assert!(records.windows(2).all(|w| w[1].interval * 2 > w[0].interval), "{name}");
        if scenario.fill_mode == FillMode::Trapezoid {
            if let Some(last) = records.last() {
                assert!(last.interval.abs_diff(planner.idle_c) <= planner.idle_c / 10, "{name}: {last:?}");
            }
        }
    }
}

#[test]
fn single_move_ramps_over_the_planned_steps() {
    let config = Config::default();
    let scenario = build_scenario("single_move", &config).unwrap().unwrap();
    let dda = scenario.moves[0];
    let (up, cruise, down) = dda.phases();
    let (report, records) = run_scenario(&config, &scenario, false).unwrap();
    assert!(report.is_clean());

    let reached = records.iter().position(|r| r.interval <= dda.cruise_c).unwrap() as u32;
    assert!(reached.abs_diff(up - 1) <= 1, "cruise at step {reached}, ramp-up is {up} steps");
    assert!(records[..reached as usize].windows(2).all(|w| w[1].interval <= w[0].interval));
    let cruise_end = (up + cruise) as usize;
    assert!(records[up as usize..cruise_end].iter().all(|r| r.interval == dda.cruise_c));
    assert!(records[cruise_end..].windows(2).all(|w| w[1].interval >= w[0].interval));
    assert_eq!(records.len() as u32 - cruise_end as u32, down);
    assert_eq!(records.last().unwrap().interval, dda.end_c);
}

#[test]
fn threaded_single_move_matches_event_simulation() {
    let config = Config::default();
    let scenario = build_scenario("single_move", &config).unwrap().unwrap();
    let (discrete, discrete_records) = run_scenario(&config, &scenario, false).unwrap();
    let (threaded, threaded_records) = run_scenario(&config, &scenario, true).unwrap();

    assert_eq!(threaded.steps, discrete.steps);
    // Stalls inside one move only delay steps, they never change the intervals.
    let intervals = |records: &[krusty_planner::simulator::StepRecord]| {
        records.iter().map(|r| r.interval).collect::<Vec<_>>()
    };
    assert_eq!(intervals(&threaded_records), intervals(&discrete_records));
    assert_eq!(threaded.elapsed_ticks, discrete_records.iter().map(|r| r.interval as u64).sum::<u64>());
}

#[test]
fn threaded_back_to_back_emits_every_step() {
    let config = Config::default();
    let scenario = build_scenario("back_to_back", &config).unwrap().unwrap();
    let (report, records) = run_scenario(&config, &scenario, true).unwrap();
    assert_eq!(report.steps, scenario.total_steps());
    assert!(records.windows(2).all(|w| w[1].move_id >= w[0].move_id));
    assert_eq!(records.last().unwrap().move_id, 5);
}

#[test]
fn config_file_moves_with_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("moves.toml");
    let mut file = File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[axis]
steps_per_mm = 100.0

[[simulation.moves]]
distance_mm = 12.5
feedrate = 80.0

[[simulation.moves]]
distance_mm = -3.0
feedrate = 150.0

[[simulation.moves]]
distance_mm = 0.0
feedrate = 10.0
"#
    )
    .unwrap();
    file.flush().unwrap();

    let overrides = vec![("planner.clip_cruise".to_string(), "false".to_string())];
    let config = load_config_with_overrides(Some(&path), &overrides).unwrap();
    assert!(!config.planner.clip_cruise);
    let scenario = build_scenario("config", &config).unwrap().unwrap();
    assert_eq!(scenario.moves.len(), 3);
    assert_eq!(scenario.total_steps(), 1_250 + 300);

    let (report, records) = run_scenario(&config, &scenario, false).unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(records.iter().filter(|r| r.move_id == 1).count(), 1_250);
    assert_eq!(records.iter().filter(|r| r.move_id == 2).count(), 300);
}

#[test]
fn slow_fill_loop_starves_but_finishes() {
    let overrides = vec![
        ("simulation.fill_period_us".to_string(), "1000000".to_string()),
        ("simulation.seed".to_string(), "11".to_string()),
    ];
    let config = load_config_with_overrides(None, &overrides).unwrap();
    let scenario = build_scenario("short_moves", &config).unwrap().unwrap();
    let (report, _) = run_scenario(&config, &scenario, false).unwrap();
    assert!(report.underruns > 0);
    assert!(report.queue_full_events > 0);
    assert!(!report.timed_out);
    assert_eq!(report.steps, report.expected_steps);
}

#[test]
fn invalid_config_is_rejected_before_running() {
    let mut config = Config::default();
    let scenario = build_scenario("single_move", &config).unwrap().unwrap();
    config.accel_table.table = Some(vec![1, 5, 2]);
    assert!(build_scenario("single_move", &config).is_err());
    assert!(run_scenario(&config, &scenario, false).is_err());
}
