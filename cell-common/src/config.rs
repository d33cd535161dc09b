use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use crate::types::DiscColor;
use std::collections::BTreeMap;
use std::path::Path;

/// What happens to a disc whose bounding circle crosses a wall.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryRule {
    /// Reflect the offending velocity component and clamp back inside.
    Reflect,
    /// Destroy discs whose centre has left the bounds; others are reflected.
    Remove,
}

/// How transformation/decomposition probabilities are interpreted.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnimolecularRates {
    /// Probability per simulated second, converted to `1 - (1 - p)^dt` per step.
    PerSecond,
    /// Probability applied as-is on every update.
    PerStep,
}

// Configuration for universe properties
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UniverseConfig {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_boundary")]
    pub boundary: BoundaryRule,
}

// Configuration for the fixed-timestep loop and publishing cadences
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub physics_dt_s: f64,
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_s: f64,
    #[serde(default = "default_counter_interval")]
    pub counter_interval_s: f64,
    #[serde(default = "default_max_steps")]
    pub max_steps_per_iteration: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PhysicsConfig {
    #[serde(default)]
    pub friction: f64,
    #[serde(default = "default_max_initial_speed")]
    pub max_initial_speed: f64,
    #[serde(default = "default_unimolecular_rates")]
    pub unimolecular_rates: UnimolecularRates,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        PhysicsConfig {
            friction: 0.0,
            max_initial_speed: default_max_initial_speed(),
            unimolecular_rates: default_unimolecular_rates(),
        }
    }
}

// Initial population of the world: disc type name -> number of discs
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct InitialConditions {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub distribution: BTreeMap<String, u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DiscTypeConfig {
    pub name: String,
    pub color: DiscColor,
    pub radius: f64,
    pub mass: f64,
}

/// A reaction rule by disc type names, e.g. `reactants = ["A", "B"]`, `products = ["C"]`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ReactionConfig {
    pub reactants: Vec<String>,
    pub products: Vec<String>,
    pub probability: f64,
}

// Configuration for output settings of the headless runner
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default)]
    pub save_counters: bool,
    #[serde(default)]
    pub save_final_positions: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "cell".to_string(),
            save_counters: false,
            save_final_positions: false,
            format: None,
        }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub universe: UniverseConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub initial_conditions: InitialConditions,
    #[serde(default)]
    pub disc_types: Vec<DiscTypeConfig>,
    #[serde(default)]
    pub reactions: Vec<ReactionConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks only. Names, radii, masses and reaction budgets are
    /// validated when the registry and reaction table are built.
    pub fn validate(&self) -> Result<()> {
        if !(self.universe.width > 0.0) || !(self.universe.height > 0.0) {
            anyhow::bail!("universe width and height must be positive.");
        }
        if !(self.timing.physics_dt_s > 0.0) {
            anyhow::bail!("physics_dt_s must be positive.");
        }
        if !(self.timing.time_scale > 0.0) {
            anyhow::bail!("time_scale must be positive.");
        }
        if self.timing.frame_interval_s < 0.0 || self.timing.counter_interval_s < 0.0 {
            anyhow::bail!("frame_interval_s and counter_interval_s must not be negative.");
        }
        if self.timing.max_steps_per_iteration == 0 {
            anyhow::bail!("max_steps_per_iteration must be at least 1.");
        }
        if self.physics.friction < 0.0 {
            anyhow::bail!("friction must not be negative.");
        }
        if self.physics.max_initial_speed < 0.0 {
            anyhow::bail!("max_initial_speed must not be negative.");
        }
        Ok(())
    }

    /// Converts the configuration into the parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        SimParams {
            world_width: self.universe.width,
            world_height: self.universe.height,
            boundary: self.universe.boundary,
            physics_dt: self.timing.physics_dt_s,
            time_scale: self.timing.time_scale,
            frame_interval: self.timing.frame_interval_s,
            counter_interval: self.timing.counter_interval_s,
            max_steps_per_iteration: self.timing.max_steps_per_iteration,
            friction: self.physics.friction,
            max_initial_speed: self.physics.max_initial_speed,
            unimolecular_rates: self.physics.unimolecular_rates,
            seed: self.initial_conditions.seed.unwrap_or(0),
        }
    }
}

fn default_boundary() -> BoundaryRule {
    BoundaryRule::Reflect
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_frame_interval() -> f64 {
    1.0 / 60.0
}

fn default_counter_interval() -> f64 {
    1.0
}

fn default_max_steps() -> u32 {
    8 // Caps catch-up work per loop iteration
}

fn default_max_initial_speed() -> f64 {
    600.0
}

fn default_unimolecular_rates() -> UnimolecularRates {
    UnimolecularRates::PerSecond
}
