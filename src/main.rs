use anyhow::{Context, Result};
use cell_common::{CounterMessage, DiscTypeId, SimulationConfig, SimulationMessage, Vec2};
use cell_engine::SimulationDriver;
use clap::Parser;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Runs the disc simulation without a renderer and records its output.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the simulation config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Wall-clock run time in seconds
    #[arg(short, long, default_value_t = 5.0)]
    duration_s: f64,
}

/// Consumer-side copy of one disc, kept in sync through deltas and frames.
#[derive(Debug, Clone, Copy)]
struct MirroredDisc {
    type_id: DiscTypeId,
    position: Vec2,
}

/// What the runner keeps from the message stream.
#[derive(Default)]
struct Recorder {
    discs: Vec<MirroredDisc>,
    counters: Vec<CounterMessage>,
    frames: u64,
    deltas: u64,
    last_step: u64,
    failure: Option<String>,
}

impl Recorder {
    fn handle(&mut self, message: SimulationMessage) {
        match message {
            SimulationMessage::Scene(scene) => {
                self.discs = scene
                    .discs
                    .iter()
                    .map(|d| MirroredDisc { type_id: d.type_id, position: d.position })
                    .collect();
            }
            SimulationMessage::Delta(delta) => {
                self.deltas += 1;
                delta.apply(
                    &mut self.discs,
                    |d| MirroredDisc { type_id: d.type_id, position: d.position },
                    |disc, type_id| disc.type_id = type_id,
                );
            }
            SimulationMessage::Frame(frame) => {
                self.frames += 1;
                if frame.positions.len() != self.discs.len() {
                    warn!(
                        "Frame at step {} has {} discs, mirror has {}.",
                        frame.step,
                        frame.positions.len(),
                        self.discs.len()
                    );
                }
                for (index, position) in frame.positions {
                    if let Some(disc) = self.discs.get_mut(index) {
                        disc.position = position;
                    }
                }
            }
            SimulationMessage::Counters(counters) => {
                debug!("Step {}: {} collisions.", counters.step, counters.total());
                self.counters.push(counters);
            }
            SimulationMessage::Stopped { step } => self.last_step = step,
            SimulationMessage::Failed(reason) => self.failure = Some(reason),
        }
    }

    fn drain(&mut self, receiver: &Receiver<SimulationMessage>) {
        for message in receiver.try_iter() {
            self.handle(message);
        }
    }
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    let args = Args::parse();
    info!("Starting cell engine (headless)...");

    // --- Load Configuration ---
    let config = SimulationConfig::load(&args.config)?;
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let (sender, receiver) = mpsc::channel();
    let mut driver = SimulationDriver::from_config(&config, sender)
        .with_context(|| format!("Failed to build simulation from '{}'", args.config.display()))?;
    debug!("Simulation Parameters: {:#?}", driver.world().params());
    for disc_type in driver.world().registry().iter() {
        info!(
            "Disc type {}: {:?}, radius {}, mass {}",
            disc_type.name(),
            disc_type.color(),
            disc_type.radius(),
            disc_type.mass()
        );
    }
    driver.reset();

    let mut recorder = Recorder::default();
    recorder.drain(&receiver);
    info!("World initialized with {} discs.", recorder.discs.len());

    // --- Run ---
    let run_time = Duration::from_secs_f64(args.duration_s.max(0.0));
    let start_time = Instant::now();
    let running = driver.start()?;

    while start_time.elapsed() < run_time {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => recorder.handle(message),
            Err(RecvTimeoutError::Timeout) if running.is_finished() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let driver = running.stop()?;
    recorder.drain(&receiver);

    if let Some(reason) = driver.failure().map(str::to_string).or(recorder.failure.take()) {
        error!("Simulation failed: {}", reason);
        anyhow::bail!("Simulation failed: {}", reason);
    }

    let world = driver.world();
    info!(
        "Simulation finished after {:.3} s: {} steps ({:.3} simulated s), {} frames, {} deltas, {} discs.",
        start_time.elapsed().as_secs_f64(),
        recorder.last_step,
        world.simulation_time(),
        recorder.frames,
        recorder.deltas,
        recorder.discs.len()
    );

    // --- Save Recorded Data ---
    let output = &config.output;
    if output.save_counters {
        let format = output.format.as_deref().unwrap_or("json");
        save_counters(&recorder.counters, &output.base_filename, format)?;
    } else {
        info!("Skipping saving counters as per config.");
    }

    if output.save_final_positions {
        let filename = format!("{}_final_positions.csv", output.base_filename);
        let mut writer = csv::Writer::from_path(&filename)
            .with_context(|| format!("Error creating CSV file '{}'", filename))?;
        writer.write_record(["type", "x", "y"])?;
        for disc in &recorder.discs {
            writer.write_record([
                world.registry().name_of(disc.type_id),
                format!("{:.4}", disc.position.x),
                format!("{:.4}", disc.position.y),
            ])?;
        }
        writer.flush()?;
        info!("Final positions saved to {}", filename);
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_counters(counters: &[CounterMessage], base_filename: &str, format: &str) -> Result<()> {
    let format = match format {
        "json" | "bincode" | "messagepack" => format,
        other => {
            error!("Unknown output format: {}. Using JSON instead.", other);
            "json"
        }
    };
    let extension = match format {
        "bincode" => "bin",
        "messagepack" => "msgpack",
        _ => "json",
    };

    let filename = format!("{}_counters.{}", base_filename, extension);
    let file = File::create(&filename).with_context(|| format!("Error creating counter file '{}'", filename))?;
    let mut writer = BufWriter::new(file);

    match format {
        "bincode" => bincode::serialize_into(&mut writer, counters)?,
        "messagepack" => rmp_serde::encode::write(&mut writer, counters)?,
        _ => serde_json::to_writer(&mut writer, counters)?,
    }
    writer.flush()?;

    info!("{} counter snapshots saved to {} ({} format)", counters.len(), filename, format);
    Ok(())
}
