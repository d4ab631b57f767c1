use nbsim::{run_2d, Frame, ScenarioConfig, Settings, Simulation, SimulationState};

use clap::Parser;
use anyhow::{Context, Result};

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
struct Args {
    /// Scenario file under `scenarios/`
    #[arg(short, default_value = "earth_moon.yaml")]
    file_name: String,

    /// Run without a window and print the final state
    #[arg(long)]
    headless: bool,

    /// Wall-clock length of a headless run
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name);
    ScenarioConfig::from_path(&config_path)
}

fn run_headless(settings: Settings, seconds: f64) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Frame>();
    let mut simulation = Simulation::with_settings(settings).with_sink(tx);
    simulation.start()?;

    let run_for = Duration::try_from_secs_f64(seconds).context("--seconds must be a non-negative number")?;
    let deadline = Instant::now() + run_for;
    let mut last: Option<Frame> = None;

    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left.min(Duration::from_secs(1))) {
            Ok(frame) => {
                if last.map_or(true, |f| f.tick / 60 != frame.tick / 60) {
                    log::debug!("frame {} at t = {}", frame.tick, frame.time);
                }
                last = Some(frame);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if simulation.state() == SimulationState::Inactive {
                    log::warn!("simulation halted before the deadline");
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if simulation.state() != SimulationState::Inactive {
        simulation.stop()?;
    }

    if let Some(frame) = last {
        println!("{} ticks, t = {}", frame.tick, frame.time);
    }
    for body in simulation.bodies().read().iter() {
        println!("{body}");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    let settings = scenario_cfg
        .to_settings()
        .with_context(|| format!("invalid scenario {}", args.file_name))?;

    if args.headless {
        run_headless(settings, args.seconds)
    } else {
        run_2d(settings, scenario_cfg.display.scale)?;
        Ok(())
    }
}
