pub mod config;
pub mod engine;
pub mod error;
pub mod ml;
pub mod risk;
pub mod safety;
pub mod types;

pub use config::{ControllerConfig, ControllerProfile};
pub use engine::{ControllerSnapshot, MetaController, StrategyEvolver, StrategyPerformance};
pub use error::{CoreError, Result};
pub use types::{FeatureObservation, MetaDecision, SafetyFlags};
