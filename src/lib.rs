//! Typed disc simulation: a fixed-step 2D physics world with collision
//! response and probabilistic reactions between disc types, plus a driver
//! that runs it on a worker thread and streams its state as messages.

pub mod disc;
pub mod disc_type;
pub mod driver;
pub mod error;
pub mod grid;
pub mod physical_object;
pub mod reaction;
pub mod world;

pub use disc::Disc;
pub use disc_type::{DiscType, DiscTypeRegistry};
pub use driver::{ControlRequest, DriverSettings, LoopState, RunningSimulation, SimulationDriver, StopToken};
pub use error::ConfigError;
pub use physical_object::PhysicalObject;
pub use reaction::{Reaction, ReactionKey, ReactionKind, ReactionTable};
pub use world::{resolve_elastic_collision, DrawSource, FixedDraw, RngDraws, World};
