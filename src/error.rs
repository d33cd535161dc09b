use thiserror::Error;

/// Errors raised while building disc types, the registry, reaction tables or a world.
///
/// These only occur at construction time. A world built from validated inputs
/// has no recoverable error path during `update`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid disc type \"{name}\": {reason}")]
    InvalidDiscType { name: String, reason: String },

    #[error("duplicate disc type name \"{0}\"")]
    DuplicateName(String),

    #[error("no disc type named \"{0}\"")]
    NotFound(String),

    #[error("disc type id {0} is not registered")]
    UnknownDiscTypeId(u32),

    #[error("invalid reaction {reaction}: {reason}")]
    InvalidReaction { reaction: String, reason: String },

    #[error("duplicate reaction \"{0}\" not allowed")]
    DuplicateReaction(String),

    #[error("adding reaction \"{reaction}\" would raise the total probability for its reactants to {total:.6} (> 1)")]
    ProbabilityBudgetExceeded { reaction: String, total: f64 },

    #[error("bounds must be positive, got {width} x {height}")]
    InvalidBounds { width: f64, height: f64 },
}
