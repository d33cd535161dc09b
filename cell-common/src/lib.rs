pub mod config;
pub mod messages;
pub mod sim_params;
pub mod types;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    BoundaryRule, DiscTypeConfig, InitialConditions, OutputConfig, PhysicsConfig, ReactionConfig,
    SimulationConfig, TimingConfig, UnimolecularRates, UniverseConfig,
};
pub use messages::{
    CounterMessage, DeltaMessage, DiscState, FrameMessage, NewDisc, SceneMessage, SimulationMessage,
};
pub use sim_params::SimParams;
pub use types::{DiscColor, DiscTypeId};
pub use vecmath::{Vec2, clamp};
