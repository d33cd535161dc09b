use serde::{Deserialize, Serialize};
use crate::config::{BoundaryRule, UnimolecularRates};

/// Simulation parameters derived from the configuration, used by the world and the driver loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // World
    pub world_width: f64,
    pub world_height: f64,
    pub boundary: BoundaryRule,

    // Time (seconds)
    pub physics_dt: f64,
    pub time_scale: f64,
    pub frame_interval: f64,
    pub counter_interval: f64,
    pub max_steps_per_iteration: u32,

    // Physics
    pub friction: f64,
    pub max_initial_speed: f64,
    pub unimolecular_rates: UnimolecularRates,

    pub seed: u64,
}
