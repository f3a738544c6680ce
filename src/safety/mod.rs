pub mod episodes;
pub mod policy;
pub mod spibb;

pub use episodes::{EpisodeBuffer, HistoricalEpisode};
pub use policy::{Policy, PolicyAction};
pub use spibb::{
    blend_policies, BootstrapBudget, ConstraintViolation, GateStatus, SafetyAssessment, SafetyGate, SafetyGateState,
};
