//! Workflow collection management
//!
//! Owns the list of stored workflows inside the application snapshot and the
//! active-workflow pointer. Every operation is a synchronous
//! read-modify-write on the store; a failed write leaves the change visible
//! in memory until the next successful write or external change.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::machine::{self, StepValidation};
use super::reducer::{reduce, WorkflowPatch};
use super::state::{GoNoGo, Step, TradeDirection, TradeStatus, WorkflowState, TOTAL_STEPS};
use crate::persistence::{AppSnapshot, AppStore};
use crate::types::now_ms;

/// Minimum acceptable risk/reward before a warning is raised
const MIN_REWARD_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Active => write!(f, "active"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWorkflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub state: WorkflowState,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl StoredWorkflow {
    /// Wrap an existing state as a new stored workflow
    pub fn from_state(state: WorkflowState) -> Self {
        let now = now_ms();
        let status = derive_status(WorkflowStatus::Pending, &state);
        Self {
            id: generate_workflow_id(now),
            name: workflow_name(&state, now),
            status,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress(&self) -> u8 {
        progress_percent(&self.state)
    }
}

/// `wf_<millis>_<random>`
pub fn generate_workflow_id(now: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("wf_{}_{}", now, suffix)
}

/// "EURUSD Long - Oct 18", or "New Workflow" before a symbol is chosen
pub fn workflow_name(state: &WorkflowState, created_at: i64) -> String {
    if state.symbol.trim().is_empty() {
        return "New Workflow".to_string();
    }
    let date = Utc
        .timestamp_millis_opt(created_at)
        .single()
        .map(|d| d.format("%b %d").to_string())
        .unwrap_or_default();
    match state.trade_direction.direction() {
        Some(direction) => format!("{} {} - {}", state.symbol, direction, date),
        None => format!("{} - {}", state.symbol, date),
    }
}

/// Status implied by the trade lifecycle; a workflow never drops back to
/// pending once active
pub fn derive_status(previous: WorkflowStatus, state: &WorkflowState) -> WorkflowStatus {
    match state.trade_status {
        TradeStatus::Closed => WorkflowStatus::Completed,
        TradeStatus::Cancelled => WorkflowStatus::Cancelled,
        _ if state.current_step > 1 || previous == WorkflowStatus::Active => WorkflowStatus::Active,
        _ => WorkflowStatus::Pending,
    }
}

/// `round(100 * completed / 8)`
pub fn progress_percent(state: &WorkflowState) -> u8 {
    ((state.completed_count() as f64 / TOTAL_STEPS as f64) * 100.0).round() as u8
}

/// Aggregated validation of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Listing row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub symbol: String,
    pub trade_direction: TradeDirection,
    pub current_step: u8,
    pub progress: u8,
    pub pnl: Option<f64>,
    pub is_active: bool,
    pub updated_at: i64,
}

pub struct WorkflowManager {
    store: Arc<AppStore>,
}

impl WorkflowManager {
    pub fn new(store: Arc<AppStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.store
    }

    pub fn list(&self) -> Vec<StoredWorkflow> {
        self.store.load().workflows.clone()
    }

    pub fn get_workflow(&self, id: &str) -> Option<StoredWorkflow> {
        self.store.load().workflow(id).cloned()
    }

    pub fn active_workflow(&self) -> Option<StoredWorkflow> {
        self.store.load().active_workflow().cloned()
    }

    pub fn active_workflow_id(&self) -> Option<String> {
        self.store.load().active_workflow_id.clone()
    }

    /// Create a workflow from defaults plus `initial`, make it active.
    /// New workflows start pending whatever step `initial` sets.
    pub fn create_workflow(&self, initial: Option<WorkflowPatch>) -> StoredWorkflow {
        let now = now_ms();
        let state = match &initial {
            Some(patch) => reduce(&WorkflowState::default(), patch, now),
            None => WorkflowState {
                last_updated: now,
                ..WorkflowState::default()
            },
        };
        let workflow = StoredWorkflow {
            id: generate_workflow_id(now),
            name: workflow_name(&state, now),
            status: WorkflowStatus::Pending,
            state,
            created_at: now,
            updated_at: now,
        };

        let stored = workflow.clone();
        if !self.store.update(move |snapshot| {
            snapshot.active_workflow_id = Some(stored.id.clone());
            snapshot.workflows.push(stored);
        }) {
            warn!("Workflow {} created but not persisted", workflow.id);
        }
        info!("Created workflow {} ({})", workflow.id, workflow.name);
        workflow
    }

    /// Point at an existing workflow, or clear the pointer with `None`
    pub fn set_active_workflow(&self, id: Option<&str>) -> bool {
        self.store
            .mutate(|snapshot| {
                if let Some(id) = id {
                    snapshot.workflow(id)?;
                }
                snapshot.active_workflow_id = id.map(str::to_string);
                Some(())
            })
            .is_some()
    }

    /// Apply `patch` to the active workflow
    pub fn update_active_workflow(&self, patch: &WorkflowPatch) -> bool {
        match self.active_workflow_id() {
            Some(id) => self.update_workflow(&id, patch),
            None => {
                debug!("No active workflow to update");
                false
            }
        }
    }

    /// Apply `patch` to one workflow, refreshing its name and status
    pub fn update_workflow(&self, id: &str, patch: &WorkflowPatch) -> bool {
        self.modify(id, |state, now| Ok::<_, ()>(reduce(state, patch, now)))
            .is_some()
    }

    /// Navigate the active workflow. Returns the failed validation when a
    /// forward move is refused; nothing is written in that case.
    pub fn go_to_step(&self, step: Step) -> Result<(), StepValidation> {
        let Some(id) = self.active_workflow_id() else {
            return Err(StepValidation {
                step,
                valid: false,
                reason: Some("No active workflow".to_string()),
            });
        };
        match self.modify(&id, |state, now| machine::go_to_step(state, step, now)) {
            Some(Ok(())) => Ok(()),
            Some(Err(validation)) => {
                debug!("Step {} refused: {}", step.number(), validation);
                Err(validation)
            }
            None => Err(StepValidation {
                step,
                valid: false,
                reason: Some("Workflow not found".to_string()),
            }),
        }
    }

    /// Remove a workflow, clearing the active pointer if it pointed here
    pub fn delete_workflow(&self, id: &str) -> bool {
        self.store
            .mutate(|snapshot| {
                let before = snapshot.workflows.len();
                snapshot.workflows.retain(|w| w.id != id);
                if snapshot.workflows.len() == before {
                    return None;
                }
                if snapshot.active_workflow_id.as_deref() == Some(id) {
                    snapshot.active_workflow_id = None;
                }
                Some(())
            })
            .is_some()
    }

    /// Copy a workflow back to step 1 with a fresh trade lifecycle
    pub fn duplicate_workflow(&self, id: &str) -> Option<StoredWorkflow> {
        let now = now_ms();
        self.store.mutate(|snapshot| {
            let source = snapshot.workflow(id)?;
            let state = WorkflowState {
                current_step: Step::Market.number(),
                completed_steps: Vec::new(),
                trade_status: TradeStatus::Planning,
                exit_price: None,
                pnl: None,
                trade_log: Vec::new(),
                go_no_go: GoNoGo::Pending,
                last_updated: now,
                ..source.state.clone()
            };
            let copy = StoredWorkflow {
                id: generate_workflow_id(now),
                name: format!("{} (Copy)", source.name),
                status: WorkflowStatus::Pending,
                state,
                created_at: now,
                updated_at: now,
            };
            snapshot.workflows.push(copy.clone());
            Some(copy)
        })
    }

    /// Close the trade and mark the workflow completed
    pub fn complete_workflow(&self, id: &str) -> bool {
        let patch = WorkflowPatch {
            trade_status: Some(TradeStatus::Closed),
            ..WorkflowPatch::default()
        };
        self.update_workflow(id, &patch)
    }

    /// Abandon the trade with a NO_GO decision
    pub fn cancel_workflow(&self, id: &str) -> bool {
        let patch = WorkflowPatch {
            trade_status: Some(TradeStatus::Cancelled),
            go_no_go: Some(GoNoGo::NoGo),
            ..WorkflowPatch::default()
        };
        self.update_workflow(id, &patch)
    }

    pub fn get_progress(&self, id: &str) -> Option<u8> {
        self.store.load().workflow(id).map(StoredWorkflow::progress)
    }

    /// Step failures up to the current step plus cross-field checks
    pub fn get_validation(&self, id: &str) -> Option<WorkflowValidation> {
        let snapshot = self.store.load();
        let state = &snapshot.workflow(id)?.state;
        Some(validate_workflow(state))
    }

    pub fn get_summaries(&self) -> Vec<WorkflowSummary> {
        let snapshot = self.store.load();
        let active = snapshot.active_workflow_id.as_deref();
        let mut summaries: Vec<WorkflowSummary> = snapshot
            .workflows
            .iter()
            .map(|w| WorkflowSummary {
                id: w.id.clone(),
                name: w.name.clone(),
                status: w.status,
                symbol: w.state.symbol.clone(),
                trade_direction: w.state.trade_direction,
                current_step: w.state.current_step,
                progress: w.progress(),
                pnl: w.state.pnl,
                is_active: active == Some(w.id.as_str()),
                updated_at: w.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Reset the whole store to an empty snapshot
    pub fn clear_all(&self) -> bool {
        let cleared = self.store.save(&AppSnapshot::default());
        info!("Cleared all workflows");
        cleared
    }

    /// Transform one workflow's state. `None` if the workflow doesn't exist;
    /// an `Err` from `f` is returned without writing.
    fn modify<E, F>(&self, id: &str, f: F) -> Option<Result<(), E>>
    where
        F: FnOnce(&WorkflowState, i64) -> Result<WorkflowState, E>,
    {
        let now = now_ms();
        let mut outcome = None;
        self.store.mutate(|snapshot| {
            let workflow = snapshot.workflow_mut(id)?;
            match f(&workflow.state, now) {
                Ok(state) => {
                    workflow.status = derive_status(workflow.status, &state);
                    if state.symbol != workflow.state.symbol
                        || state.trade_direction != workflow.state.trade_direction
                    {
                        workflow.name = workflow_name(&state, workflow.created_at);
                    }
                    workflow.state = state;
                    workflow.updated_at = now;
                    outcome = Some(Ok(()));
                    Some(())
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    None
                }
            }
        });
        outcome
    }
}

/// Aggregate validation for one state
pub fn validate_workflow(state: &WorkflowState) -> WorkflowValidation {
    let mut errors: Vec<String> = Step::ALL
        .iter()
        .filter(|s| s.number() <= state.current_step)
        .map(|&s| machine::validate_step(state, s))
        .filter(|v| !v.valid)
        .map(|v| v.to_string())
        .collect();
    let mut warnings = Vec::new();

    if state.current_step > Step::Position.number() && state.position_size <= 0.0 {
        errors.push("Position size is zero past the sizing step".to_string());
    }

    let expected = super::reducer::derive_trade_direction(state.higher_trend, state.lower_trend);
    if state.trade_direction != expected {
        errors.push(format!(
            "Trade direction {} does not match trends ({:?}/{:?})",
            state.trade_direction, state.higher_trend, state.lower_trend
        ));
    }

    if let Some(direction) = state.trade_direction.direction() {
        if state.fib_levels.iter().any(|l| l.direction != direction) {
            warnings.push(format!("Some Fibonacci levels are not drawn for a {} trade", direction));
        }
    }

    if state.risk_reward_ratio > 0.0 && state.risk_reward_ratio < MIN_REWARD_RATIO {
        warnings.push(format!(
            "Risk/reward {:.2} is below {}:1",
            state.risk_reward_ratio, MIN_REWARD_RATIO
        ));
    }

    WorkflowValidation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{KeyValueBackend, MemoryBackend};
    use crate::workflow::state::Trend;

    fn manager() -> (MemoryBackend, WorkflowManager) {
        let backend = MemoryBackend::new();
        let store = Arc::new(AppStore::new(Arc::new(backend.clone())));
        (backend, WorkflowManager::new(store))
    }

    #[test]
    fn test_create_sets_active_and_persists() {
        let (backend, manager) = manager();
        let wf = manager.create_workflow(None);

        assert!(wf.id.starts_with("wf_"));
        assert_eq!(wf.id.split('_').count(), 3);
        assert_eq!(wf.name, "New Workflow");
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert_eq!(manager.active_workflow_id().as_deref(), Some(wf.id.as_str()));

        // A fresh store over the same backend sees it
        let other = WorkflowManager::new(Arc::new(AppStore::new(Arc::new(backend))));
        assert_eq!(other.get_workflow(&wf.id).map(|w| w.id), Some(wf.id));
    }

    #[test]
    fn test_create_starts_pending_past_step_one() {
        let (_, manager) = manager();
        let wf = manager.create_workflow(Some(WorkflowPatch {
            current_step: Some(3),
            ..WorkflowPatch::default()
        }));
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert_eq!(manager.get_workflow(&wf.id).unwrap().status, WorkflowStatus::Pending);

        manager.update_active_workflow(&WorkflowPatch::default());
        assert_eq!(manager.get_workflow(&wf.id).unwrap().status, WorkflowStatus::Active);
    }

    #[test]
    fn test_trend_scenario_names_and_promotes() {
        let (_, manager) = manager();
        let wf = manager.create_workflow(Some(WorkflowPatch::market("EURUSD", "1D", "4H")));
        assert!(manager.go_to_step(Step::Trend).is_ok());
        assert!(manager.update_active_workflow(&WorkflowPatch::trend(Trend::Up, Trend::Down)));

        let stored = manager.get_workflow(&wf.id).unwrap();
        assert_eq!(stored.state.trade_direction, TradeDirection::GoLong);
        assert_eq!(stored.status, WorkflowStatus::Active);
        assert!(stored.name.starts_with("EURUSD Long - "));
        assert!(manager.go_to_step(Step::Fibonacci).is_ok());
    }

    #[test]
    fn test_refused_step_writes_nothing() {
        let (backend, manager) = manager();
        let wf = manager.create_workflow(Some(WorkflowPatch::market("EURUSD", "1D", "4H")));
        manager.go_to_step(Step::Trend).unwrap();
        let before = backend.get(crate::persistence::STORE_KEY).unwrap();

        let err = manager.go_to_step(Step::Fibonacci).unwrap_err();
        assert!(err.reason.unwrap().contains("STAND_ASIDE"));
        assert_eq!(backend.get(crate::persistence::STORE_KEY).unwrap(), before);
        assert_eq!(manager.get_workflow(&wf.id).unwrap().state.current_step, 2);
    }

    #[test]
    fn test_progress() {
        let (_, manager) = manager();
        let wf = manager.create_workflow(None);
        assert_eq!(manager.get_progress(&wf.id), Some(0));
        manager.update_active_workflow(&WorkflowPatch {
            completed_steps: Some(vec![1, 2, 3]),
            ..WorkflowPatch::default()
        });
        // 3/8 = 37.5 rounds to 38
        assert_eq!(manager.get_progress(&wf.id), Some(38));
        assert_eq!(manager.get_progress("wf_missing"), None);
    }

    #[test]
    fn test_delete_active_clears_pointer() {
        let (_, manager) = manager();
        let a = manager.create_workflow(None);
        let b = manager.create_workflow(None);
        assert_eq!(manager.active_workflow_id(), Some(b.id.clone()));

        assert!(manager.delete_workflow(&b.id));
        assert_eq!(manager.active_workflow_id(), None);
        assert!(!manager.delete_workflow(&b.id));
        assert_eq!(manager.list().len(), 1);
        assert_eq!(manager.list()[0].id, a.id);
    }

    #[test]
    fn test_duplicate_resets_progress() {
        let (_, manager) = manager();
        let wf = manager.create_workflow(Some(WorkflowPatch::market("GBPUSD", "1D", "4H")));
        manager.update_active_workflow(&WorkflowPatch {
            current_step: Some(5),
            completed_steps: Some(vec![1, 2, 3, 4]),
            ..WorkflowPatch::default()
        });

        let copy = manager.duplicate_workflow(&wf.id).unwrap();
        assert_ne!(copy.id, wf.id);
        assert!(copy.name.ends_with(" (Copy)"));
        assert_eq!(copy.state.current_step, 1);
        assert!(copy.state.completed_steps.is_empty());
        assert_eq!(copy.state.symbol, "GBPUSD");
        assert_eq!(manager.active_workflow_id(), Some(wf.id));
        assert!(manager.duplicate_workflow("wf_missing").is_none());

        manager.update_workflow(&copy.id, &WorkflowPatch::risk(100.0, 98.0, vec![104.0]));
        let copy = manager.get_workflow(&copy.id).unwrap();
        assert!(copy.name.ends_with(" (Copy)"));
    }

    #[test]
    fn test_complete_and_cancel() {
        let (_, manager) = manager();
        let a = manager.create_workflow(None);
        let b = manager.create_workflow(None);

        assert!(manager.complete_workflow(&a.id));
        assert!(manager.cancel_workflow(&b.id));
        let a = manager.get_workflow(&a.id).unwrap();
        let b = manager.get_workflow(&b.id).unwrap();
        assert_eq!(a.status, WorkflowStatus::Completed);
        assert_eq!(b.status, WorkflowStatus::Cancelled);
        assert_eq!(b.state.go_no_go, GoNoGo::NoGo);
        assert!(!manager.complete_workflow("wf_missing"));
    }

    #[test]
    fn test_set_active_rejects_unknown() {
        let (_, manager) = manager();
        let wf = manager.create_workflow(None);
        assert!(!manager.set_active_workflow(Some("wf_missing")));
        assert_eq!(manager.active_workflow_id(), Some(wf.id.clone()));
        assert!(manager.set_active_workflow(None));
        assert_eq!(manager.active_workflow_id(), None);
        assert!(!manager.update_active_workflow(&WorkflowPatch::default()));
    }

    #[test]
    fn test_validation_warns_on_low_reward() {
        let (_, manager) = manager();
        let wf = manager.create_workflow(Some(WorkflowPatch::risk(100.0, 98.0, vec![103.0])));
        let validation = manager.get_validation(&wf.id).unwrap();
        assert!(validation.warnings.iter().any(|w| w.contains("below 2:1")));
        assert!(validation.is_valid);

        manager.update_active_workflow(&WorkflowPatch {
            current_step: Some(3),
            ..WorkflowPatch::default()
        });
        let validation = manager.get_validation(&wf.id).unwrap();
        assert!(!validation.is_valid);
        assert!(validation.errors.iter().any(|e| e.contains("STAND_ASIDE")));
        assert!(validation.errors.iter().any(|e| e.starts_with("Step 3:")));
    }

    #[test]
    fn test_summaries_and_clear() {
        let (backend, manager) = manager();
        manager.create_workflow(None);
        let b = manager.create_workflow(Some(WorkflowPatch::market("USDJPY", "1D", "4H")));
        let summaries = manager.get_summaries();
        assert_eq!(summaries.len(), 2);
        let active: Vec<_> = summaries.iter().filter(|s| s.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
        assert_eq!(active[0].symbol, "USDJPY");

        manager.store().update(|s| s.watchlist.push("EURUSD".into()));
        assert!(manager.clear_all());
        assert!(manager.list().is_empty());
        assert_eq!(manager.active_workflow_id(), None);
        let reloaded: AppSnapshot =
            serde_json::from_str(&backend.get(crate::persistence::STORE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(reloaded, AppSnapshot::default());
    }

    #[test]
    fn test_failed_write_stays_visible() {
        let (backend, manager) = manager();
        let wf = manager.create_workflow(None);
        backend.set_read_only(true);
        assert!(manager.update_active_workflow(&WorkflowPatch::market("AUDUSD", "1D", "4H")));
        assert_eq!(manager.get_workflow(&wf.id).unwrap().state.symbol, "AUDUSD");
    }
}
