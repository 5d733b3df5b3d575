pub mod error;
pub mod prompt;
pub mod registry;
pub mod runner;
pub mod structured;
pub mod tools;

pub use error::EngineError;
pub use registry::{ToolOutcome, ToolRegistry};
pub use runner::{EngineConfig, SessionCleared, TurnOrchestrator, TurnOutcome};
