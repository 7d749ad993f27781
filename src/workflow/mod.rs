//! Eight-step trade workflow
//!
//! - [`state`] - the per-workflow record and its enums
//! - [`reducer`] - patch merging and derived fields
//! - [`machine`] - step validation and navigation
//! - [`scan`] - harmonic pattern and candle signal scan
//! - [`manager`] - stored workflows, active pointer, summaries

pub mod machine;
pub mod manager;
pub mod reducer;
pub mod scan;
pub mod state;

pub use machine::{go_to_step, validate_step, StepValidation};
pub use manager::{
    derive_status, generate_workflow_id, progress_percent, validate_workflow, workflow_name,
    StoredWorkflow, WorkflowManager, WorkflowStatus, WorkflowSummary, WorkflowValidation,
};
pub use reducer::{
    derive_go_no_go, derive_trade_direction, position_size, reduce, risk_reward, trade_pnl,
    WorkflowPatch,
};
pub use scan::{detect_signals, harmonic_request, scan_patterns, PatternScan};
pub use state::{
    default_checklist, ChecklistItem, DetectedPattern, GoNoGo, SignalBar, SignalKind, Step,
    TradeDirection, TradeLogEntry, TradeStatus, Trend, WorkflowState, TOTAL_STEPS,
};
