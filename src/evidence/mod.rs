pub mod error;
pub mod memory;
pub mod ports;
pub mod store;

pub use error::EvidenceError;
pub use memory::InMemoryEvidenceStore;
pub use ports::EvidenceSourcePort;
pub use store::{EvidenceConfig, JsonDirectoryStore};
