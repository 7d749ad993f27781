//! Pure state transitions
//!
//! Every change to a [`WorkflowState`] goes through [`reduce`]: the patch is
//! merged over the old state, derived fields are recomputed, and the
//! timestamp is refreshed. Nothing here touches storage.

use serde::{Deserialize, Deserializer, Serialize};

use super::state::{
    ChecklistItem, DetectedPattern, GoNoGo, SignalBar, TradeDirection, TradeLogEntry, TradeStatus,
    Trend, WorkflowState,
};
use crate::levels::{LevelStrategy, WorkflowLevel};
use crate::types::{Direction, PivotPoint};

/// Partial update. `None` leaves a field untouched; for optional fields the
/// inner `None` clears it. In JSON an absent key leaves the field alone and
/// an explicit `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowPatch {
    pub current_step: Option<u8>,
    pub completed_steps: Option<Vec<u8>>,

    pub symbol: Option<String>,
    pub higher_timeframe: Option<String>,
    pub lower_timeframe: Option<String>,

    pub higher_trend: Option<Trend>,
    pub lower_trend: Option<Trend>,

    pub pivots: Option<Vec<PivotPoint>>,
    pub fib_tool: Option<LevelStrategy>,
    pub fib_levels: Option<Vec<WorkflowLevel>>,
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub selected_level: Option<Option<String>>,

    pub pattern_scan_complete: Option<bool>,
    pub detected_patterns: Option<Vec<DetectedPattern>>,
    pub signals: Option<Vec<SignalBar>>,

    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub entry_signal: Option<Option<SignalBar>>,
    pub entry_confirmed: Option<bool>,

    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub targets: Option<Vec<f64>>,
    pub account_balance: Option<f64>,
    pub risk_percent: Option<f64>,
    /// Manual override; otherwise the size is recomputed from risk inputs
    pub position_size: Option<f64>,

    pub checklist: Option<Vec<ChecklistItem>>,
    /// (item id, checked) toggles applied after `checklist`
    pub checks: Vec<(String, bool)>,
    pub go_no_go: Option<GoNoGo>,

    pub trade_status: Option<TradeStatus>,
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<Option<f64>>,
    /// Free-form line appended to the trade log
    pub note: Option<String>,
}

/// Maps a present key (including `null`) to `Some`; absent keys hit `default`
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl WorkflowPatch {
    pub fn market(symbol: &str, higher_timeframe: &str, lower_timeframe: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            higher_timeframe: Some(higher_timeframe.to_string()),
            lower_timeframe: Some(lower_timeframe.to_string()),
            ..Self::default()
        }
    }

    pub fn trend(higher: Trend, lower: Trend) -> Self {
        Self {
            higher_trend: Some(higher),
            lower_trend: Some(lower),
            ..Self::default()
        }
    }

    pub fn check(id: &str, checked: bool) -> Self {
        Self {
            checks: vec![(id.to_string(), checked)],
            ..Self::default()
        }
    }

    pub fn risk(entry_price: f64, stop_loss: f64, targets: Vec<f64>) -> Self {
        Self {
            entry_price: Some(entry_price),
            stop_loss: Some(stop_loss),
            targets: Some(targets),
            ..Self::default()
        }
    }

    fn touches_sizing(&self) -> bool {
        self.entry_price.is_some()
            || self.stop_loss.is_some()
            || self.account_balance.is_some()
            || self.risk_percent.is_some()
    }
}

/// UP over DOWN buys the pullback, DOWN over UP sells the rally
pub fn derive_trade_direction(higher: Trend, lower: Trend) -> TradeDirection {
    match (higher, lower) {
        (Trend::Up, Trend::Down) => TradeDirection::GoLong,
        (Trend::Down, Trend::Up) => TradeDirection::GoShort,
        _ => TradeDirection::StandAside,
    }
}

/// GO once every required item is checked
pub fn derive_go_no_go(checklist: &[ChecklistItem]) -> GoNoGo {
    if checklist.iter().filter(|c| c.required).all(|c| c.checked) {
        GoNoGo::Go
    } else {
        GoNoGo::Pending
    }
}

/// Units for a fixed-fractional risk, floored to two decimals.
/// Zero when the stop sits on the entry.
pub fn position_size(account_balance: f64, risk_percent: f64, entry: f64, stop: f64) -> f64 {
    let stop_distance = (entry - stop).abs();
    if stop_distance == 0.0 || account_balance <= 0.0 || risk_percent <= 0.0 {
        return 0.0;
    }
    let risk_amount = account_balance * risk_percent / 100.0;
    (risk_amount / stop_distance * 100.0).floor() / 100.0
}

/// Reward over risk; zero when the stop sits on the entry
pub fn risk_reward(entry: f64, stop: f64, target: f64) -> f64 {
    let stop_distance = (entry - stop).abs();
    if stop_distance == 0.0 {
        return 0.0;
    }
    (target - entry).abs() / stop_distance
}

/// Signed P&L of a closed trade
pub fn trade_pnl(direction: TradeDirection, entry: f64, exit: f64, size: f64) -> f64 {
    let sign = direction.direction().map(Direction::sign).unwrap_or(1.0);
    (exit - entry) * size * sign
}

/// Merge `patch` over `old` and recompute derived fields
pub fn reduce(old: &WorkflowState, patch: &WorkflowPatch, now: i64) -> WorkflowState {
    let mut next = old.clone();

    macro_rules! merge {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = &patch.$field {
                next.$field = value.clone();
            })*
        };
    }

    merge!(
        current_step,
        completed_steps,
        symbol,
        higher_timeframe,
        lower_timeframe,
        higher_trend,
        lower_trend,
        pivots,
        fib_tool,
        fib_levels,
        selected_level,
        pattern_scan_complete,
        detected_patterns,
        signals,
        entry_signal,
        entry_price,
        stop_loss,
        targets,
        account_balance,
        risk_percent,
        checklist,
        exit_price,
    );

    for (id, checked) in &patch.checks {
        if let Some(item) = next.checklist.iter_mut().find(|c| &c.id == id) {
            item.checked = *checked;
        }
    }

    // Trend
    next.trade_direction = derive_trade_direction(next.higher_trend, next.lower_trend);

    // Entry
    next.entry_confirmed = match (patch.entry_confirmed, &patch.entry_signal) {
        (Some(confirmed), _) => confirmed,
        (None, Some(signal)) => signal.is_some(),
        (None, None) => next.entry_confirmed,
    };

    // Position
    if let Some(size) = patch.position_size {
        next.position_size = size.max(0.0);
    } else if patch.touches_sizing() {
        next.position_size = position_size(
            next.account_balance,
            next.risk_percent,
            next.entry_price,
            next.stop_loss,
        );
    }
    next.risk_reward_ratio = next
        .targets
        .first()
        .map(|&target| risk_reward(next.entry_price, next.stop_loss, target))
        .unwrap_or(0.0);

    // Checklist; NO_GO stays until explicitly overridden
    next.go_no_go = match patch.go_no_go {
        Some(decision) => decision,
        None if next.go_no_go == GoNoGo::NoGo => GoNoGo::NoGo,
        None => derive_go_no_go(&next.checklist),
    };

    // Trade lifecycle
    if let Some(status) = patch.trade_status {
        if status != old.trade_status {
            apply_status_change(&mut next, status, now);
        }
    }
    if let Some(note) = &patch.note {
        next.trade_log.push(TradeLogEntry {
            timestamp: now,
            message: note.clone(),
        });
    }

    next.last_updated = now;
    next
}

fn apply_status_change(next: &mut WorkflowState, status: TradeStatus, now: i64) {
    next.trade_status = status;
    let message = match status {
        TradeStatus::Planning => "Trade reset to planning".to_string(),
        TradeStatus::Open => format!(
            "Opened {} {} @ {} (stop {}, size {})",
            next.trade_direction, next.symbol, next.entry_price, next.stop_loss, next.position_size
        ),
        TradeStatus::Closed => match next.exit_price {
            Some(exit) => {
                let pnl = trade_pnl(next.trade_direction, next.entry_price, exit, next.position_size);
                next.pnl = Some(pnl);
                format!("Closed {} @ {} (P&L {:.2})", next.symbol, exit, pnl)
            }
            None => format!("Closed {}", next.symbol),
        },
        TradeStatus::Cancelled => format!("Cancelled {}", next.symbol),
    };
    next.trade_log.push(TradeLogEntry {
        timestamp: now,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_scenarios() {
        let state = WorkflowState::default();
        let next = reduce(&state, &WorkflowPatch::trend(Trend::Up, Trend::Down), 1);
        assert_eq!(next.trade_direction, TradeDirection::GoLong);

        let next = reduce(&state, &WorkflowPatch::trend(Trend::Down, Trend::Up), 1);
        assert_eq!(next.trade_direction, TradeDirection::GoShort);

        let next = reduce(&state, &WorkflowPatch::trend(Trend::Up, Trend::Up), 1);
        assert_eq!(next.trade_direction, TradeDirection::StandAside);

        let next = reduce(&state, &WorkflowPatch::trend(Trend::Neutral, Trend::Down), 1);
        assert_eq!(next.trade_direction, TradeDirection::StandAside);
    }

    #[test]
    fn test_reduce_is_pure_and_stamps_time() {
        let state = WorkflowState::default();
        let before = state.clone();
        let next = reduce(&state, &WorkflowPatch::market("EURUSD", "1W", "1D"), 42);
        assert_eq!(state, before);
        assert_eq!(next.symbol, "EURUSD");
        assert_eq!(next.higher_timeframe, "1W");
        assert_eq!(next.last_updated, 42);
    }

    #[test]
    fn test_position_size_and_rr() {
        assert_eq!(position_size(10_000.0, 2.0, 50.0, 48.0), 100.0);
        assert_eq!(position_size(10_000.0, 1.0, 100.0, 97.0), 33.33);
        assert_eq!(position_size(10_000.0, 1.0, 100.0, 100.0), 0.0);
        assert_eq!(risk_reward(100.0, 98.0, 106.0), 3.0);
        assert_eq!(risk_reward(100.0, 100.0, 106.0), 0.0);
    }

    #[test]
    fn test_risk_patch_derives_size_and_rr() {
        let state = WorkflowState::default();
        let next = reduce(&state, &WorkflowPatch::risk(100.0, 98.0, vec![104.0, 108.0]), 1);
        assert_eq!(next.position_size, 50.0);
        assert_eq!(next.risk_reward_ratio, 2.0);

        let manual = WorkflowPatch {
            position_size: Some(12.0),
            ..WorkflowPatch::default()
        };
        let next = reduce(&next, &manual, 2);
        assert_eq!(next.position_size, 12.0);
    }

    #[test]
    fn test_go_no_go_follows_required_items() {
        let mut state = WorkflowState::default();
        let required: Vec<String> = state
            .checklist
            .iter()
            .filter(|c| c.required)
            .map(|c| c.id.clone())
            .collect();

        for (i, id) in required.iter().enumerate() {
            assert_eq!(state.go_no_go, GoNoGo::Pending, "after {} checks", i);
            state = reduce(&state, &WorkflowPatch::check(id, true), 1);
        }
        assert_eq!(state.go_no_go, GoNoGo::Go);

        state = reduce(&state, &WorkflowPatch::check(&required[0], false), 2);
        assert_eq!(state.go_no_go, GoNoGo::Pending);
    }

    #[test]
    fn test_no_go_is_sticky() {
        let state = WorkflowState::default();
        let state = reduce(
            &state,
            &WorkflowPatch {
                go_no_go: Some(GoNoGo::NoGo),
                ..WorkflowPatch::default()
            },
            1,
        );
        let state = reduce(&state, &WorkflowPatch::check("trend-aligned", true), 2);
        assert_eq!(state.go_no_go, GoNoGo::NoGo);
    }

    #[test]
    fn test_close_computes_pnl_and_logs() {
        let state = reduce(
            &WorkflowState::default(),
            &WorkflowPatch {
                symbol: Some("EURUSD".into()),
                ..WorkflowPatch::trend(Trend::Down, Trend::Up)
            },
            1,
        );
        let state = reduce(&state, &WorkflowPatch::risk(100.0, 102.0, vec![94.0]), 2);
        assert_eq!(state.position_size, 50.0);

        let state = reduce(
            &state,
            &WorkflowPatch {
                trade_status: Some(TradeStatus::Open),
                ..WorkflowPatch::default()
            },
            3,
        );
        let state = reduce(
            &state,
            &WorkflowPatch {
                trade_status: Some(TradeStatus::Closed),
                exit_price: Some(Some(96.0)),
                ..WorkflowPatch::default()
            },
            4,
        );

        assert_eq!(state.pnl, Some(200.0));
        assert_eq!(state.trade_log.len(), 2);
        assert!(state.trade_log[1].message.contains("P&L 200.00"));
    }

    #[test]
    fn test_entry_signal_confirms() {
        let signal = SignalBar {
            kind: crate::workflow::state::SignalKind::PinBar,
            bar_index: 10,
            direction: crate::types::Direction::Long,
            trigger_price: 101.0,
            invalidation_price: 99.0,
            timestamp: 0,
        };
        let state = reduce(
            &WorkflowState::default(),
            &WorkflowPatch {
                entry_signal: Some(Some(signal)),
                ..WorkflowPatch::default()
            },
            1,
        );
        assert!(state.entry_confirmed);

        let state = reduce(
            &state,
            &WorkflowPatch {
                entry_signal: Some(None),
                ..WorkflowPatch::default()
            },
            2,
        );
        assert!(!state.entry_confirmed);
    }

    #[test]
    fn test_json_null_clears_optional_fields() {
        let state = WorkflowState {
            selected_level: Some("fib-0.618".to_string()),
            exit_price: Some(96.0),
            ..WorkflowState::default()
        };

        let untouched: WorkflowPatch = serde_json::from_str(r#"{"symbol":"EURUSD"}"#).unwrap();
        assert_eq!(untouched.selected_level, None);
        let next = reduce(&state, &untouched, 1);
        assert_eq!(next.selected_level.as_deref(), Some("fib-0.618"));
        assert_eq!(next.exit_price, Some(96.0));

        let clearing: WorkflowPatch =
            serde_json::from_str(r#"{"selectedLevel":null,"exitPrice":null,"entrySignal":null}"#).unwrap();
        assert_eq!(clearing.selected_level, Some(None));
        assert_eq!(clearing.entry_signal, Some(None));
        let next = reduce(&state, &clearing, 2);
        assert_eq!(next.selected_level, None);
        assert_eq!(next.exit_price, None);

        let json = serde_json::to_string(&clearing).unwrap();
        assert!(json.contains(r#""exitPrice":null"#));
        assert!(!serde_json::to_string(&untouched).unwrap().contains("exitPrice"));
    }
}
