//! Multi-timeframe level refresh
//!
//! Gathers levels for every timeframe with pivots, marks confluence and
//! builds zones. Retracement and extension prices come from the analysis
//! backend when one is configured; a failed request contributes no levels
//! for that strategy. Only the most recent refresh is applied.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::calc::{anchors_from_pivots, calculate_levels, LevelAnchors, WorkflowLevel};
use super::confluence::{detect_confluence_zones, mark_confluence, ConfluenceZone, DEFAULT_TOLERANCE_PCT};
use super::ratios::LevelStrategy;
use crate::api::{AnalysisApi, FibonacciKind, FibonacciRequest};
use crate::persistence::{LevelVisibility, ValidationSettings};
use crate::pivots::{ManagedPivot, PivotManager};
use crate::sequence::RequestGuard;
use crate::types::Direction;

#[derive(Debug, Clone, PartialEq)]
pub struct LevelSettings {
    pub tolerance_pct: f64,
    pub extended_ratios: bool,
    pub strategies: Vec<LevelStrategy>,
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            tolerance_pct: DEFAULT_TOLERANCE_PCT,
            extended_ratios: false,
            strategies: LevelStrategy::ALL.to_vec(),
        }
    }
}

impl LevelSettings {
    /// Settings from the persisted validation and visibility preferences
    pub fn from_preferences(validation: &ValidationSettings, visibility: &LevelVisibility) -> Self {
        let strategies = LevelStrategy::ALL
            .into_iter()
            .filter(|s| match s {
                LevelStrategy::Retracement => visibility.retracement,
                LevelStrategy::Extension => visibility.extension,
                LevelStrategy::Expansion => visibility.expansion,
                LevelStrategy::Projection => visibility.projection,
            })
            .collect();
        Self {
            tolerance_pct: validation.tolerance_pct,
            extended_ratios: validation.extended_ratios,
            strategies,
        }
    }
}

/// Result of one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSet {
    pub direction: Direction,
    pub levels: Vec<WorkflowLevel>,
    pub zones: Vec<ConfluenceZone>,
}

impl LevelSet {
    /// Mark confluence on `levels` and cluster them into zones
    pub fn build(direction: Direction, mut levels: Vec<WorkflowLevel>, tolerance_pct: f64) -> Self {
        mark_confluence(&mut levels, tolerance_pct);
        let zones = detect_confluence_zones(&levels, tolerance_pct);
        Self {
            direction,
            levels,
            zones,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

pub struct LevelService {
    api: Option<Arc<dyn AnalysisApi>>,
    settings: LevelSettings,
    guard: RequestGuard,
    latest: Mutex<Option<LevelSet>>,
}

impl LevelService {
    pub fn new(settings: LevelSettings) -> Self {
        Self {
            api: None,
            settings,
            guard: RequestGuard::new(),
            latest: Mutex::new(None),
        }
    }

    pub fn with_api(mut self, api: Arc<dyn AnalysisApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn settings(&self) -> &LevelSettings {
        &self.settings
    }

    /// Levels from the last applied refresh
    pub fn latest(&self) -> Option<LevelSet> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Compute levels locally for the given (timeframe, pivots) pairs
    pub fn compute(&self, timeframes: &[(String, Vec<ManagedPivot>)], direction: Direction) -> LevelSet {
        let mut levels = Vec::new();
        for (timeframe, pivots) in timeframes {
            for &strategy in &self.settings.strategies {
                if let Some(anchors) = anchors_from_pivots(strategy, pivots) {
                    levels.extend(calculate_levels(
                        strategy,
                        anchors,
                        direction,
                        timeframe,
                        self.settings.extended_ratios,
                    ));
                }
            }
        }
        LevelSet::build(direction, levels, self.settings.tolerance_pct)
    }

    /// Recompute levels for every timeframe the manager holds pivots for.
    /// Returns `None` if a newer refresh started before this one finished.
    pub async fn refresh(&self, pivots: &PivotManager, direction: Direction) -> Option<LevelSet> {
        let ticket = self.guard.begin();

        let timeframes: Vec<(String, Vec<ManagedPivot>)> = pivots
            .get_timeframes_with_pivots()
            .into_iter()
            .map(|tf| {
                let points = pivots.get_pivots(&tf);
                (tf, points)
            })
            .collect();

        let mut levels = Vec::new();
        for (timeframe, points) in &timeframes {
            for &strategy in &self.settings.strategies {
                let Some(anchors) = anchors_from_pivots(strategy, points) else {
                    continue;
                };
                levels.extend(self.strategy_levels(strategy, anchors, direction, timeframe).await);
            }
        }

        if !self.guard.is_current(ticket) {
            debug!("Discarding stale level refresh #{}", ticket.id());
            return None;
        }

        let set = LevelSet::build(direction, levels, self.settings.tolerance_pct);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(set.clone());
        Some(set)
    }

    async fn strategy_levels(
        &self,
        strategy: LevelStrategy,
        anchors: LevelAnchors,
        direction: Direction,
        timeframe: &str,
    ) -> Vec<WorkflowLevel> {
        let remote_kind = match strategy {
            LevelStrategy::Retracement => Some(FibonacciKind::Retracement),
            LevelStrategy::Extension => Some(FibonacciKind::Extension),
            _ => None,
        };

        match (&self.api, remote_kind, anchors) {
            (Some(api), Some(kind), LevelAnchors::Swing { high, low }) => {
                let request = FibonacciRequest::new(high, low, direction);
                match api.fibonacci_levels(kind, &request).await {
                    Ok(response) => response
                        .ratio_levels()
                        .into_iter()
                        .map(|(ratio, price)| {
                            WorkflowLevel::new(strategy, ratio, price, timeframe, direction)
                        })
                        .collect(),
                    Err(e) => {
                        warn!("Fibonacci {} request for {} failed: {}", kind.path(), timeframe, e);
                        Vec::new()
                    }
                }
            }
            _ => calculate_levels(
                strategy,
                anchors,
                direction,
                timeframe,
                self.settings.extended_ratios,
            ),
        }
    }
}
