pub mod config;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod signaling;
pub mod telemetry;
pub mod timer;
pub mod wire;
