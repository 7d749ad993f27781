//! Application snapshot persisted under a single key

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::backend::KeyValueBackend;
use super::store::{LegacyMigration, Snapshot};
use crate::pivots::TimeframePivotData;
use crate::workflow::{StoredWorkflow, WorkflowState};

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 2;

/// Primary storage key
pub const STORE_KEY: &str = "fib-workflow-store";

/// Pre-multi-workflow key holding a single bare `WorkflowState`
pub const LEGACY_STATE_KEY: &str = "fib-workflow-state";

/// symbol -> timeframe -> pivots
pub type PivotStore = BTreeMap<String, BTreeMap<String, TimeframePivotData>>;

/// Which level families are drawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LevelVisibility {
    pub retracement: bool,
    pub extension: bool,
    pub expansion: bool,
    pub projection: bool,
    pub confluence_zones: bool,
}

impl Default for LevelVisibility {
    fn default() -> Self {
        Self {
            retracement: true,
            extension: true,
            expansion: true,
            projection: true,
            confluence_zones: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationSettings {
    /// Confluence tolerance as a percentage of price
    pub tolerance_pct: f64,
    pub extended_ratios: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            tolerance_pct: crate::levels::DEFAULT_TOLERANCE_PCT,
            extended_ratios: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlert {
    pub id: String,
    pub symbol: String,
    pub price: f64,
    pub condition: AlertCondition,
    #[serde(default)]
    pub triggered: bool,
    #[serde(default)]
    pub created_at: i64,
}

impl PriceAlert {
    pub fn is_hit(&self, price: f64) -> bool {
        match self.condition {
            AlertCondition::Above => price >= self.price,
            AlertCondition::Below => price <= self.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoRefresh {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for AutoRefresh {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

/// Everything the application persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSnapshot {
    pub version: u32,
    pub workflows: Vec<StoredWorkflow>,
    pub active_workflow_id: Option<String>,
    pub pivots: PivotStore,
    pub visibility: LevelVisibility,
    pub validation: ValidationSettings,
    pub alerts: Vec<PriceAlert>,
    pub watchlist: Vec<String>,
    pub auto_refresh: AutoRefresh,
    pub theme: Theme,
}

impl Default for AppSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            workflows: Vec::new(),
            active_workflow_id: None,
            pivots: PivotStore::new(),
            visibility: LevelVisibility::default(),
            validation: ValidationSettings::default(),
            alerts: Vec::new(),
            watchlist: Vec::new(),
            auto_refresh: AutoRefresh::default(),
            theme: Theme::default(),
        }
    }
}

impl AppSnapshot {
    pub fn workflow(&self, id: &str) -> Option<&StoredWorkflow> {
        self.workflows.iter().find(|w| w.id == id)
    }

    pub fn workflow_mut(&mut self, id: &str) -> Option<&mut StoredWorkflow> {
        self.workflows.iter_mut().find(|w| w.id == id)
    }

    pub fn active_workflow(&self) -> Option<&StoredWorkflow> {
        self.active_workflow_id.as_deref().and_then(|id| self.workflow(id))
    }

    /// Untriggered alerts for `symbol` that `price` has crossed
    pub fn alerts_hit(&self, symbol: &str, price: f64) -> Vec<&PriceAlert> {
        self.alerts
            .iter()
            .filter(|a| !a.triggered && a.symbol == symbol && a.is_hit(price))
            .collect()
    }
}

impl Snapshot for AppSnapshot {
    const KEY: &'static str = STORE_KEY;

    fn migrate_legacy(backend: &dyn KeyValueBackend) -> Option<LegacyMigration<Self>> {
        let raw = backend.get(LEGACY_STATE_KEY).ok()??;
        let state: WorkflowState = serde_json::from_str(&raw).ok()?;
        if !is_meaningful(&state) {
            return None;
        }

        info!(
            "Found legacy workflow for '{}' at step {}",
            state.symbol, state.current_step
        );

        let workflow = StoredWorkflow::from_state(state);
        let snapshot = AppSnapshot {
            active_workflow_id: Some(workflow.id.clone()),
            workflows: vec![workflow],
            ..AppSnapshot::default()
        };

        Some(LegacyMigration {
            snapshot,
            legacy_key: LEGACY_STATE_KEY.to_string(),
        })
    }

    fn normalize(&mut self) {
        if self.version < SNAPSHOT_VERSION {
            self.version = SNAPSHOT_VERSION;
        }
        if let Some(id) = self.active_workflow_id.as_deref() {
            if self.workflow(id).is_none() {
                self.active_workflow_id = None;
            }
        }
    }
}

/// Legacy state worth migrating: user made some progress or picked a market
fn is_meaningful(state: &WorkflowState) -> bool {
    state.current_step > 1 || !state.completed_steps.is_empty() || !state.symbol.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryBackend, PersistenceStore};
    use std::sync::Arc;

    #[test]
    fn test_partial_snapshot_gets_defaults() {
        let backend = MemoryBackend::new();
        backend
            .set(STORE_KEY, r#"{"version":1,"watchlist":["EURUSD"]}"#)
            .unwrap();
        let store: PersistenceStore<AppSnapshot> = PersistenceStore::new(Arc::new(backend));
        let snapshot = store.load();

        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.watchlist, vec!["EURUSD".to_string()]);
        assert!(snapshot.visibility.retracement);
        assert_eq!(snapshot.validation.tolerance_pct, 0.5);
        assert_eq!(snapshot.theme, Theme::Dark);
        assert!(snapshot.workflows.is_empty());
    }

    #[test]
    fn test_dangling_active_id_is_cleared() {
        let backend = MemoryBackend::new();
        backend
            .set(STORE_KEY, r#"{"workflows":[],"activeWorkflowId":"wf_missing"}"#)
            .unwrap();
        let store: PersistenceStore<AppSnapshot> = PersistenceStore::new(Arc::new(backend));
        assert_eq!(store.load().active_workflow_id, None);
    }

    #[test]
    fn test_legacy_state_is_migrated() {
        let backend = MemoryBackend::new();
        backend
            .set(
                LEGACY_STATE_KEY,
                r#"{"currentStep":3,"completedSteps":[1,2],"symbol":"GBPUSD","higherTrend":"up","lowerTrend":"down"}"#,
            )
            .unwrap();
        let store: PersistenceStore<AppSnapshot> = PersistenceStore::new(Arc::new(backend.clone()));
        let snapshot = store.load();

        assert_eq!(snapshot.workflows.len(), 1);
        let wf = &snapshot.workflows[0];
        assert_eq!(snapshot.active_workflow_id.as_deref(), Some(wf.id.as_str()));
        assert_eq!(wf.state.symbol, "GBPUSD");
        assert_eq!(wf.state.current_step, 3);
        assert_eq!(backend.get(LEGACY_STATE_KEY).unwrap(), None);
    }

    #[test]
    fn test_legacy_state_survives_read_only_backend() {
        let backend = MemoryBackend::new();
        backend
            .set(LEGACY_STATE_KEY, r#"{"currentStep":3,"symbol":"GBPUSD"}"#)
            .unwrap();
        backend.set_read_only(true);
        let store: PersistenceStore<AppSnapshot> = PersistenceStore::new(Arc::new(backend.clone()));

        let snapshot = store.load();
        assert_eq!(snapshot.workflows.len(), 1);
        assert_eq!(snapshot.workflows[0].state.symbol, "GBPUSD");
        assert!(Arc::ptr_eq(&snapshot, &store.load()));
        assert!(backend.get(LEGACY_STATE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_empty_legacy_state_is_not_migrated() {
        let backend = MemoryBackend::new();
        backend.set(LEGACY_STATE_KEY, r#"{"currentStep":1}"#).unwrap();
        let store: PersistenceStore<AppSnapshot> = PersistenceStore::new(Arc::new(backend.clone()));
        assert!(store.load().workflows.is_empty());
        assert!(backend.get(LEGACY_STATE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_alerts_hit() {
        let snapshot = AppSnapshot {
            alerts: vec![
                PriceAlert {
                    id: "a1".into(),
                    symbol: "EURUSD".into(),
                    price: 1.10,
                    condition: AlertCondition::Above,
                    triggered: false,
                    created_at: 0,
                },
                PriceAlert {
                    id: "a2".into(),
                    symbol: "EURUSD".into(),
                    price: 1.05,
                    condition: AlertCondition::Below,
                    triggered: false,
                    created_at: 0,
                },
            ],
            ..AppSnapshot::default()
        };
        let hit = snapshot.alerts_hit("EURUSD", 1.11);
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].id, "a1");
        assert!(snapshot.alerts_hit("GBPUSD", 1.11).is_empty());
    }
}
