pub mod mock;
pub mod orchestrator;
