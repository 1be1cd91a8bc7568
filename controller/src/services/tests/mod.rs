//! Service-specific tests
//!
//! Each service has its own test file. None of them need a running broker or
//! recorder: they exercise the pure parts and the filesystem side effects.


pub mod common {
    use shared::QosLevel;

    use crate::core::RunConfig;

    pub fn run_config(participants: u32, qos: QosLevel) -> RunConfig {
        RunConfig {
            participant_count: participants,
            qos,
            message_amount: 100,
            message_size: 64,
            frequency: 10.0,
        }
    }
}
