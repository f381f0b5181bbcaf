//! Domain types: configuration, envelopes, errors and call correlation.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod pending;

// Re-exports for convenience
pub use config::{ClientConfig, ConfigError, ProcessingMode, QueueConfig, ServerConfig};
pub use correlation::CorrelationId;
pub use envelope::{RpcRequest, RpcResponse};
pub use error::{RpcError, RpcResult};
pub use pending::{PendingCall, PendingCallTable, PendingStats};
