use thiserror::Error;

use crate::types::{EventId, VariableName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Logged and passed through with the raw value; never aborts a run.
    #[error("value '{raw_value}' of '{variable}' (event {event_id}) has no controlled-vocabulary code")]
    UnmappableValue {
        event_id: EventId,
        variable: VariableName,
        raw_value: String,
    },
}
