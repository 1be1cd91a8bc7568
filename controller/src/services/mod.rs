//! Service implementations
//!
//! Real implementations of the service traits. These handle the actual I/O:
//! the broker process, the MQTT session and the packet recorder.

pub mod broker;
pub mod capture;
pub mod process;
pub mod transport;

#[cfg(test)]
mod tests;

pub use broker::RealBrokerSupervisor;
pub use capture::RealCaptureManager;
pub use transport::{RealTransport, TopicMap};
