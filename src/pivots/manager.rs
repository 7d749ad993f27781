//! Swing pivot ownership per (symbol, timeframe)
//!
//! The manager keeps the active symbol's timeframe buckets in memory and
//! writes every change through to the shared [`AppStore`]. Switching symbol
//! reloads the buckets; other symbols' pivots stay in the store untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::labeling::{label_abc, AbcLabel};
use crate::api::{AnalysisApi, PivotDetectRequest};
use crate::config::PivotDetectionConfig;
use crate::persistence::AppStore;
use crate::sequence::RequestGuard;
use crate::types::{now_ms, PivotPoint, PivotType, TrendDirection};

/// Pivots for one (symbol, timeframe)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeframePivotData {
    pub points: Vec<PivotPoint>,
    pub locked_from_refresh: bool,
    pub last_modified: i64,
    pub trend_direction: TrendDirection,
}

/// Pivot with its stable id and optional ABC label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedPivot {
    pub id: String,
    #[serde(flatten)]
    pub point: PivotPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abc_label: Option<AbcLabel>,
}

impl ManagedPivot {
    pub fn new(timeframe: &str, point: PivotPoint) -> Self {
        Self {
            id: pivot_id(timeframe, &point),
            point,
            abc_label: None,
        }
    }
}

/// Deterministic identity from timeframe, kind, bar index and timestamp
pub fn pivot_id(timeframe: &str, point: &PivotPoint) -> String {
    format!(
        "{}-{}-{}-{}",
        timeframe, point.pivot_type, point.index, point.timestamp
    )
}

/// User-supplied pivot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewPivot {
    pub index: usize,
    pub price: f64,
    pub pivot_type: PivotType,
}

struct PivotView {
    symbol: String,
    timeframes: BTreeMap<String, TimeframePivotData>,
}

pub struct PivotManager {
    store: Arc<AppStore>,
    api: Option<Arc<dyn AnalysisApi>>,
    detection: PivotDetectionConfig,
    view: Mutex<PivotView>,
    guards: Mutex<HashMap<String, Arc<RequestGuard>>>,
}

impl PivotManager {
    /// Manager without a detection backend (manual pivots only)
    pub fn new(store: Arc<AppStore>, symbol: &str) -> Self {
        let timeframes = load_symbol(&store, symbol);
        Self {
            store,
            api: None,
            detection: PivotDetectionConfig::default(),
            view: Mutex::new(PivotView {
                symbol: symbol.to_string(),
                timeframes,
            }),
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_api(mut self, api: Arc<dyn AnalysisApi>, detection: PivotDetectionConfig) -> Self {
        self.api = Some(api);
        self.detection = detection;
        self
    }

    pub fn symbol(&self) -> String {
        self.lock_view().symbol.clone()
    }

    /// Switch the active symbol and load its buckets from the store
    pub fn set_symbol(&self, symbol: &str) {
        let timeframes = load_symbol(&self.store, symbol);
        let mut view = self.lock_view();
        if view.symbol != symbol {
            debug!("Pivot view switched {} -> {}", view.symbol, symbol);
        }
        view.symbol = symbol.to_string();
        view.timeframes = timeframes;
    }

    /// Re-read the active symbol from the store (after an external change)
    pub fn reload(&self) {
        let symbol = self.symbol();
        self.set_symbol(&symbol);
    }

    pub fn get_pivots(&self, timeframe: &str) -> Vec<ManagedPivot> {
        let view = self.lock_view();
        view.timeframes
            .get(timeframe)
            .map(|data| {
                data.points
                    .iter()
                    .cloned()
                    .map(|p| ManagedPivot::new(timeframe, p))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_pivots_with_labels(&self, timeframe: &str) -> Vec<ManagedPivot> {
        label_abc(&self.get_pivots(timeframe))
    }

    /// Timeframes of the active symbol holding at least one pivot
    pub fn get_timeframes_with_pivots(&self) -> Vec<String> {
        self.lock_view()
            .timeframes
            .iter()
            .filter(|(_, data)| !data.points.is_empty())
            .map(|(tf, _)| tf.clone())
            .collect()
    }

    /// Add a manual pivot. A pivot with the same index and kind is replaced.
    pub fn add_pivot(&self, timeframe: &str, pivot: NewPivot) -> ManagedPivot {
        let point = PivotPoint {
            index: pivot.index,
            price: pivot.price,
            pivot_type: pivot.pivot_type,
            timestamp: now_ms(),
            is_manual: true,
        };
        let added = ManagedPivot::new(timeframe, point.clone());

        self.modify(timeframe, |data| {
            data.points
                .retain(|p| !(p.index == point.index && p.pivot_type == point.pivot_type));
            data.points.push(point);
            data.points.sort_by_key(|p| p.index);
            true
        });
        added
    }

    /// Move a pivot's price; the pivot becomes manual
    pub fn update_pivot_price(&self, timeframe: &str, id: &str, price: f64) -> bool {
        self.modify(timeframe, |data| {
            match data.points.iter_mut().find(|p| pivot_id(timeframe, p) == id) {
                Some(point) => {
                    point.price = price;
                    point.is_manual = true;
                    true
                }
                None => false,
            }
        })
    }

    pub fn remove_pivot(&self, timeframe: &str, id: &str) -> bool {
        self.modify(timeframe, |data| {
            let before = data.points.len();
            data.points.retain(|p| pivot_id(timeframe, p) != id);
            data.points.len() != before
        })
    }

    pub fn clear_pivots(&self, timeframe: &str) {
        let symbol = {
            let mut view = self.lock_view();
            view.timeframes.remove(timeframe);
            view.symbol.clone()
        };
        self.store.update(|snapshot| {
            if let Some(buckets) = snapshot.pivots.get_mut(&symbol) {
                buckets.remove(timeframe);
                if buckets.is_empty() {
                    snapshot.pivots.remove(&symbol);
                }
            }
        });
    }

    /// Clear every timeframe of the active symbol
    pub fn reset_all(&self) {
        let symbol = {
            let mut view = self.lock_view();
            view.timeframes.clear();
            view.symbol.clone()
        };
        self.store.update(|snapshot| {
            snapshot.pivots.remove(&symbol);
        });
        info!("Cleared all pivots for {}", symbol);
    }

    pub fn lock_pivots(&self, timeframe: &str, locked: bool) {
        self.modify(timeframe, |data| {
            data.locked_from_refresh = locked;
            true
        });
    }

    pub fn is_locked(&self, timeframe: &str) -> bool {
        self.lock_view()
            .timeframes
            .get(timeframe)
            .map(|d| d.locked_from_refresh)
            .unwrap_or(false)
    }

    pub fn set_trend_direction(&self, timeframe: &str, direction: TrendDirection) {
        self.modify(timeframe, |data| {
            data.trend_direction = direction;
            true
        });
    }

    pub fn get_trend_direction(&self, timeframe: &str) -> TrendDirection {
        self.lock_view()
            .timeframes
            .get(timeframe)
            .map(|d| d.trend_direction)
            .unwrap_or_default()
    }

    /// Replace the timeframe's pivots with freshly detected ones.
    ///
    /// No-op when locked, when no backend is configured, on any failed or
    /// empty response, and when a newer detection for the same timeframe
    /// started meanwhile. Returns whether new pivots were applied.
    pub async fn detect_pivots(&self, timeframe: &str) -> bool {
        if self.is_locked(timeframe) {
            debug!("Pivots for {} are locked, skipping detection", timeframe);
            return false;
        }
        let Some(api) = self.api.clone() else {
            debug!("No analysis backend configured, skipping detection");
            return false;
        };

        let guard = self.guard_for(timeframe);
        let ticket = guard.begin();
        let symbol = self.symbol();

        let bars = match api
            .market_data(&symbol, timeframe, self.detection.periods)
            .await
        {
            Ok(bars) if !bars.is_empty() => bars,
            Ok(_) => {
                warn!("No market data for {} {}", symbol, timeframe);
                return false;
            }
            Err(e) => {
                warn!("Market data request for {} {} failed: {}", symbol, timeframe, e);
                return false;
            }
        };

        let request = PivotDetectRequest {
            data: bars.clone(),
            lookback: self.detection.lookback,
            count: self.detection.count,
        };
        let response = match api.detect_pivots(&request).await {
            Ok(response) if !response.pivots.is_empty() => response,
            Ok(_) => {
                warn!("Pivot detection returned nothing for {} {}", symbol, timeframe);
                return false;
            }
            Err(e) => {
                warn!("Pivot detection for {} {} failed: {}", symbol, timeframe, e);
                return false;
            }
        };

        if !guard.is_current(ticket) {
            debug!(
                "Discarding stale pivot detection #{} for {} {}",
                ticket.id(),
                symbol,
                timeframe
            );
            return false;
        }
        if self.symbol() != symbol || self.is_locked(timeframe) {
            debug!("Symbol changed or pivots locked during detection, discarding");
            return false;
        }

        let fallback_ts = now_ms();
        let mut points: Vec<PivotPoint> = Vec::with_capacity(response.pivots.len());
        for detected in &response.pivots {
            if points
                .iter()
                .any(|p| p.index == detected.index && p.pivot_type == detected.pivot_type)
            {
                continue;
            }
            points.push(PivotPoint {
                index: detected.index,
                price: detected.price,
                pivot_type: detected.pivot_type,
                timestamp: bars
                    .get(detected.index)
                    .map(|b| b.timestamp)
                    .unwrap_or(fallback_ts),
                is_manual: false,
            });
        }
        points.sort_by_key(|p| p.index);

        let count = points.len();
        self.modify(timeframe, |data| {
            data.points = points;
            true
        });
        info!("Detected {} pivots for {} {}", count, symbol, timeframe);
        true
    }

    fn guard_for(&self, timeframe: &str) -> Arc<RequestGuard> {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guards.entry(timeframe.to_string()).or_default())
    }

    fn lock_view(&self) -> std::sync::MutexGuard<'_, PivotView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the bucket (creating it on first write) and persist if it
    /// reports a change
    fn modify<F: FnOnce(&mut TimeframePivotData) -> bool>(&self, timeframe: &str, f: F) -> bool {
        let (symbol, data) = {
            let mut view = self.lock_view();
            let symbol = view.symbol.clone();
            let data = view.timeframes.entry(timeframe.to_string()).or_default();
            if !f(data) {
                return false;
            }
            data.last_modified = now_ms();
            (symbol, data.clone())
        };

        self.store.update(|snapshot| {
            snapshot
                .pivots
                .entry(symbol)
                .or_default()
                .insert(timeframe.to_string(), data);
        });
        true
    }
}

fn load_symbol(store: &AppStore, symbol: &str) -> BTreeMap<String, TimeframePivotData> {
    store.load().pivots.get(symbol).cloned().unwrap_or_default()
}
