pub mod dictionary;
pub mod error;
pub mod format;

pub use dictionary::{DataDictionary, VariableDictionary};
pub use error::FormatError;
pub use format::{FormattedRecord, FormattedVariable, ResultFormatter};
