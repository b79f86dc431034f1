// Library exports for the sequencer, its host seams and the simulator

pub mod config;
pub mod events;
pub mod host;
pub mod matcher;
pub mod quality;
pub mod sequencer;
pub mod service;
pub mod simulator;

pub use config::Config;
pub use events::SearchEvents;
pub use matcher::{AudioFormat, MatchCriteria, QualityPreset};
pub use sequencer::{RunSummary, Sequencer, SequencerState};
pub use service::{start_sequencer_service, SequencerHandle};

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
