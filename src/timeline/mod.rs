pub mod builder;
pub mod error;

pub use builder::{TimelineBuilder, TimelineConfig};
pub use error::TimelineError;
