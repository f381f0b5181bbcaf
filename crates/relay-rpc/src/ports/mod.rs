//! Ports used by the client and server besides the relay transport.

pub mod outbound;

pub use outbound::{ManualTimeSource, SystemTimeSource, TimeSource};
