pub mod bandit;
pub mod features;
pub mod regime;
pub mod regression;
pub mod tracker;

pub use bandit::{BanditArm, BanditPhase, BanditSelection, StrategyBandit};
pub use features::{FeatureImportance, FeatureSelector};
pub use regime::{RegimeDetector, RegimeState};
pub use regression::{OnlineElasticNet, RegressionPrediction};
pub use tracker::{PerformanceSummary, PerformanceTracker};
