//! CLI entry point for the simulation harness: scenario runs, parameter sweeps, and CSV/JSONL output.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use krusty_planner::config::{load_config_with_overrides, Config};
use krusty_planner::simulator::scenario::{build_scenario, Scenario, SCENARIOS};
use krusty_planner::simulator::{run_scenario, SimReport, StepRecord};
use serde::Serialize;
use tracing::Level;

/// Upper bound on the number of points a sweep may expand to.
const MAX_SWEEP_POINTS: usize = 10_000;

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Planner simulation harness for scenario runs and parameter sweeps.")]
pub struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for CSV/JSONL files
    #[arg(short, long, default_value = "./sim_output")]
    output: PathBuf,

    /// Scenario to run (see list-scenarios)
    #[arg(long, default_value = "single_move")]
    scenario: String,

    /// Parameter override (e.g. --param axis.max_accel=2500)
    #[arg(long, value_parser = parse_key_val, num_args = 1)]
    param: Vec<(String, String)>,

    /// Parameter sweep (e.g. --sweep axis.max_accel=1000:500:4000)
    #[arg(long, value_parser = parse_key_val, num_args = 1)]
    sweep: Vec<(String, String)>,

    /// Run the fill loop and the step loop on separate threads
    #[arg(long)]
    threaded: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available built-in scenarios
    ListScenarios,
    /// Run a single scenario (default)
    Run,
    /// Run a parameter sweep
    Sweep,
}

/// One line of `sweep.csv`.
#[derive(Debug, Serialize)]
struct SweepRow {
    point: String,
    steps: u64,
    expected_steps: u64,
    elapsed_ticks: u64,
    underruns: u64,
    queue_full_events: u64,
    min_interval: Option<u32>,
    max_interval: Option<u32>,
    timed_out: bool,
}

impl SweepRow {
    fn new(point: String, report: &SimReport) -> Self {
        Self {
            point,
            steps: report.steps,
            expected_steps: report.expected_steps,
            elapsed_ticks: report.elapsed_ticks,
            underruns: report.underruns,
            queue_full_events: report.queue_full_events,
            min_interval: report.min_interval,
            max_interval: report.max_interval,
            timed_out: report.timed_out,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=');
    match pos {
        Some(pos) => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        None => Err(format!("Invalid KEY=VAL: no `=` found in '{}'.", s)),
    }
}

/// Expands `start:step:end` (inclusive) or a single value. Integer ranges stay
/// integers so they can feed integer fields.
fn parse_range(s: &str) -> Result<Vec<String>, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let values = match parts.as_slice() {
        [single] => vec![single.to_string()],
        [start, step, end] => {
            if let (Ok(start), Ok(step), Ok(end)) =
                (start.parse::<i64>(), step.parse::<i64>(), end.parse::<i64>())
            {
                if step <= 0 {
                    return Err(format!("sweep step must be positive in '{s}'"));
                }
                (0i64..)
                    .map_while(|i| i.checked_mul(step).and_then(|offset| start.checked_add(offset)))
                    .take_while(|v| *v <= end)
                    .take(MAX_SWEEP_POINTS + 1)
                    .map(|v| v.to_string())
                    .collect()
            } else {
                let parse = |v: &str| {
                    v.parse::<f64>()
                        .map_err(|_| format!("'{v}' is not a number in sweep range '{s}'"))
                };
                let (start, step, end) = (parse(start)?, parse(step)?, parse(end)?);
                if !(step > 0.0) || !start.is_finite() || !end.is_finite() {
                    return Err(format!("invalid sweep range '{s}'"));
                }
                (0..)
                    .map(|i| start + i as f64 * step)
                    .take_while(|v| *v <= end + step * 1e-9)
                    .take(MAX_SWEEP_POINTS + 1)
                    .map(|v| v.to_string())
                    .collect()
            }
        }
        _ => return Err(format!("invalid sweep range '{s}', expected start:step:end")),
    };
    Ok(values)
}

/// Every combination of the swept values, first key varying slowest.
fn sweep_points(axes: &[(String, Vec<String>)]) -> Vec<Vec<(String, String)>> {
    axes.iter().fold(vec![Vec::new()], |points, (key, values)| {
        points
            .iter()
            .flat_map(|point| {
                values.iter().map(move |value| {
                    let mut next = point.clone();
                    next.push((key.clone(), value.clone()));
                    next
                })
            })
            .collect()
    })
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load(cli: &Cli, overrides: &[(String, String)]) -> Result<Config, Box<dyn Error>> {
    let config = load_config_with_overrides(cli.config.as_deref(), overrides)?;
    config.validate()?;
    Ok(config)
}

fn scenario(cli: &Cli, config: &Config) -> Result<Scenario, Box<dyn Error>> {
    let scenario = build_scenario(&cli.scenario, config)?
        .ok_or_else(|| format!("unknown scenario '{}', try list-scenarios", cli.scenario))?;
    if scenario.moves.is_empty() {
        tracing::warn!(scenario = scenario.name.as_str(), "scenario has no moves");
    }
    Ok(scenario)
}

fn write_csv(path: &Path, records: &[StepRecord]) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_jsonl(path: &Path, records: &[StepRecord]) -> Result<(), Box<dyn Error>> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn print_report(name: &str, report: &SimReport, f_cpu: u32) {
    println!("scenario:        {name}");
    println!("steps:           {}/{}", report.steps, report.expected_steps);
    println!(
        "elapsed:         {} ticks ({:.3} s)",
        report.elapsed_ticks,
        report.elapsed_ticks as f64 / f_cpu as f64
    );
    println!("underruns:       {}", report.underruns);
    println!("queue full:      {}", report.queue_full_events);
    if let (Some(min), Some(max)) = (report.min_interval, report.max_interval) {
        println!("interval range:  {min}..={max} ticks");
    }
    if report.timed_out {
        println!("TIMED OUT");
    }
}

fn run_single(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = load(cli, &cli.param)?;
    let scenario = scenario(cli, &config)?;
    std::fs::create_dir_all(&cli.output)?;

    let (report, records) = run_scenario(&config, &scenario, cli.threaded)?;

    let stem = cli.output.join(&scenario.name);
    write_csv(&stem.with_extension("csv"), &records)?;
    write_jsonl(&stem.with_extension("jsonl"), &records)?;
    std::fs::write(
        cli.output.join(format!("{}_report.json", scenario.name)),
        serde_json::to_string_pretty(&report)?,
    )?;
    std::fs::write(cli.output.join("effective_config.toml"), toml::to_string_pretty(&config)?)?;
    tracing::info!(output = %cli.output.display(), records = records.len(), "wrote results");

    print_report(&scenario.name, &report, config.planner.f_cpu);
    Ok(())
}

fn run_sweep(cli: &Cli) -> Result<(), Box<dyn Error>> {
    if cli.sweep.is_empty() {
        return Err("sweep needs at least one --sweep key=start:step:end".into());
    }
    let axes = cli
        .sweep
        .iter()
        .map(|(key, range)| Ok((key.clone(), parse_range(range)?)))
        .collect::<Result<Vec<_>, String>>()?;
    let points = sweep_points(&axes);
    if points.len() > MAX_SWEEP_POINTS {
        return Err(format!("sweep expands to {} points, limit is {MAX_SWEEP_POINTS}", points.len()).into());
    }
    std::fs::create_dir_all(&cli.output)?;
    let path = cli.output.join("sweep.csv");
    let mut wtr = csv::Writer::from_path(&path)?;

    tracing::info!(points = points.len(), scenario = cli.scenario.as_str(), "starting sweep");
    for point in points {
        let label = point
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        let mut overrides = cli.param.clone();
        overrides.extend(point);

        let result = load(cli, &overrides).and_then(|config| {
            let scenario = scenario(cli, &config)?;
            Ok(run_scenario(&config, &scenario, cli.threaded)?)
        });
        match result {
            Ok((report, _)) => {
                println!(
                    "{label}: {}/{} steps, {} ticks, {} underruns",
                    report.steps, report.expected_steps, report.elapsed_ticks, report.underruns
                );
                wtr.serialize(SweepRow::new(label, &report))?;
            }
            Err(e) => tracing::warn!(point = label.as_str(), "skipped: {}", e),
        }
    }
    wtr.flush()?;
    tracing::info!(path = %path.display(), "wrote sweep results");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::ListScenarios => {
            println!("Available scenarios:");
            for (name, description) in SCENARIOS {
                println!("  {name:<14} {description}");
            }
            Ok(())
        }
        Commands::Run => run_single(&cli),
        Commands::Sweep => run_sweep(&cli),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
