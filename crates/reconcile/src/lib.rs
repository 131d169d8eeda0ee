pub mod engine;
pub mod normalize;
pub mod stats;

pub use engine::{MatchTier, MergeGroup, Reconciliation, ReconcileEngine, ScoreWeights};
pub use normalize::normalize_text;
pub use stats::MergeStats;
