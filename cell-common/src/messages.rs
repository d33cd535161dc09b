use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use crate::types::DiscTypeId;
use crate::vecmath::Vec2;

/// Full state of one disc as seen by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscState {
    pub type_id: DiscTypeId,
    pub position: Vec2,
    pub velocity: Vec2,
}

/// A disc created during an update (reaction product).
pub type NewDisc = DiscState;

/// Complete world contents, published after a reset so a consumer can rebuild its collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMessage {
    pub step: u64,
    pub bounds: Vec2,
    /// Indexed like the world's disc collection.
    pub discs: Vec<DiscState>,
}

/// Positions for rendering, emitted at the frame cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Number of physics steps taken when the frame was captured.
    pub step: u64,
    /// Simulated seconds since the last reset.
    pub simulation_time: f64,
    pub positions: Vec<(usize, Vec2)>,
}

/// Changes made by a single physics step.
///
/// Consumers must apply the parts in this order: append `new_discs`, remove
/// `destroyed_indices` (already descending, expressed over the collection
/// with the new discs appended), then retype `changed_discs` (indices after
/// removal). [`DeltaMessage::apply`] does exactly that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    pub step: u64,
    pub new_discs: Vec<NewDisc>,
    pub destroyed_indices: Vec<usize>,
    pub changed_discs: Vec<(usize, DiscTypeId)>,
}

impl DeltaMessage {
    pub fn is_empty(&self) -> bool {
        self.new_discs.is_empty() && self.destroyed_indices.is_empty() && self.changed_discs.is_empty()
    }

    /// Applies the delta to a consumer-side collection mirroring the world's discs.
    pub fn apply<T, C, R>(&self, discs: &mut Vec<T>, mut create: C, mut retype: R)
    where
        C: FnMut(&NewDisc) -> T,
        R: FnMut(&mut T, DiscTypeId),
    {
        discs.extend(self.new_discs.iter().map(&mut create));

        debug_assert!(self.destroyed_indices.windows(2).all(|w| w[0] > w[1]));
        for &index in &self.destroyed_indices {
            // Order-preserving removal, matching the world's compaction.
            discs.remove(index);
        }

        for &(index, type_id) in &self.changed_discs {
            retype(&mut discs[index], type_id);
        }
    }
}

/// Collisions per disc type since the previous counter message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterMessage {
    pub step: u64,
    pub simulation_time: f64,
    pub counts: BTreeMap<DiscTypeId, u64>,
}

impl CounterMessage {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Everything the simulation worker hands to its consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimulationMessage {
    Scene(SceneMessage),
    Frame(FrameMessage),
    Delta(DeltaMessage),
    Counters(CounterMessage),
    /// The worker observed a stop request and exited cleanly.
    Stopped { step: u64 },
    /// The run was aborted; the world must be reset before restarting.
    Failed(String),
}
