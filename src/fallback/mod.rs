pub mod controller;
pub mod policy;
pub mod review;
pub mod state;

pub use controller::{EventAbstraction, FallbackController};
pub use policy::{AbstractionConfig, StageSources, TemporalWindows, WindowDays};
pub use review::{
    CompletionConflictReviewer, ConflictReviewPort, ConflictReviewRequest, NoopConflictReviewer,
};
pub use state::{ExhaustReason, StageTransition, VariableProgress};
