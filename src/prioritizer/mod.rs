pub mod ranking;
pub mod scoring;

pub use ranking::{DocumentPrioritizer, RankedRecord, RankedSelection, StagePlan};
pub use scoring::{TypePriorityTable, composite_score, temporal_proximity_score};
