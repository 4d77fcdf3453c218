pub mod config;
pub mod error;
pub mod host;
pub mod identity;
pub mod network;
pub mod orchestrator;

pub use error::HostError;
pub use host::{AgentHost, HostConfig};
pub use orchestrator::{StepResult, WorkflowOrchestrator, WorkflowStep};
