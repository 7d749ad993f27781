// Library crate - Fibonacci trading workflow engine

pub mod api;
pub mod config;
pub mod levels;
pub mod persistence;
pub mod pivots;
pub mod sequence;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use config::AppConfig;
pub use persistence::{AppSnapshot, AppStore};
pub use pivots::PivotManager;
pub use types::*;
pub use workflow::{Step, StoredWorkflow, WorkflowManager, WorkflowPatch, WorkflowState};
