pub mod gateway;

pub use gateway::GatewayCompletionPort;
