pub mod aggregate;
pub mod confidence;
pub mod overrides;

pub use aggregate::{AggregationPolicy, EvidenceAggregator};
pub use confidence::confidence_score;
pub use overrides::{DayWindow, GoldStandardPolicy, GoldStandardRule};
