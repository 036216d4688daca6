//! Heal orchestration: sequences, the scope registry, and wire types

pub mod registry;
pub mod sequence;
pub mod types;

pub use registry::HealSessionRegistry;
pub use sequence::{HealSequence, SequenceLimits};
pub use types::{
    DriveState, HealDriveInfo, HealItemType, HealOpts, HealResultItem, HealScope, HealStartSuccess,
    HealState, HealStopSuccess, HealTaskStatus,
};
