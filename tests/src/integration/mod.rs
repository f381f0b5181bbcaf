//! Cross-component flows.

pub mod concurrency;
pub mod flows;
pub mod queued;
pub mod transport;
pub mod whitelist;
