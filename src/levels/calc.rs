//! Level price formulas
//!
//! With `range = high - low`:
//! - retracement: long `high - range*r`, short `low + range*r`
//! - extension: long `low - range*(r-1)`, short `high + range*(r-1)`
//! - expansion: long `low + range*r`, short `high - range*r`
//! - projection: `C ± |B-A|*r` (+ long, - short)
//!
//! Direction is always an explicit input; it is never inferred from the
//! geometry of the anchor points.

use serde::{Deserialize, Serialize};

use super::ratios::LevelStrategy;
use crate::pivots::{abc_prices, ManagedPivot};
use crate::types::{Direction, PivotType};

/// Reference points a level is measured from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelAnchors {
    Swing { high: f64, low: f64 },
    Abc { a: f64, b: f64, c: f64 },
}

/// A computed price level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLevel {
    pub id: String,
    pub ratio: f64,
    pub price: f64,
    pub strategy: LevelStrategy,
    pub timeframe: String,
    pub direction: Direction,
    pub label: String,
    #[serde(default)]
    pub confluence_count: usize,
    #[serde(default)]
    pub is_confluence: bool,
}

impl WorkflowLevel {
    pub fn new(
        strategy: LevelStrategy,
        ratio: f64,
        price: f64,
        timeframe: &str,
        direction: Direction,
    ) -> Self {
        Self {
            id: format!("{}-{}-{}-{}", timeframe, strategy, ratio, direction),
            ratio,
            price,
            strategy,
            timeframe: timeframe.to_string(),
            direction,
            label: format!("{} {:.1}% {}", timeframe, ratio * 100.0, strategy.tag()),
            confluence_count: 0,
            is_confluence: false,
        }
    }
}

pub fn retracement_price(high: f64, low: f64, ratio: f64, direction: Direction) -> f64 {
    let range = high - low;
    match direction {
        Direction::Long => high - range * ratio,
        Direction::Short => low + range * ratio,
    }
}

pub fn extension_price(high: f64, low: f64, ratio: f64, direction: Direction) -> f64 {
    let range = high - low;
    match direction {
        Direction::Long => low - range * (ratio - 1.0),
        Direction::Short => high + range * (ratio - 1.0),
    }
}

pub fn expansion_price(high: f64, low: f64, ratio: f64, direction: Direction) -> f64 {
    let range = high - low;
    match direction {
        Direction::Long => low + range * ratio,
        Direction::Short => high - range * ratio,
    }
}

pub fn projection_price(a: f64, b: f64, c: f64, ratio: f64, direction: Direction) -> f64 {
    let ab_range = (b - a).abs();
    match direction {
        Direction::Long => c + ab_range * ratio,
        Direction::Short => c - ab_range * ratio,
    }
}

/// Price for one ratio, or `None` if the anchors don't fit the strategy
pub fn level_price(
    strategy: LevelStrategy,
    anchors: LevelAnchors,
    ratio: f64,
    direction: Direction,
) -> Option<f64> {
    match (strategy, anchors) {
        (LevelStrategy::Retracement, LevelAnchors::Swing { high, low }) => {
            Some(retracement_price(high, low, ratio, direction))
        }
        (LevelStrategy::Extension, LevelAnchors::Swing { high, low }) => {
            Some(extension_price(high, low, ratio, direction))
        }
        (LevelStrategy::Expansion, LevelAnchors::Swing { high, low }) => {
            Some(expansion_price(high, low, ratio, direction))
        }
        (LevelStrategy::Projection, LevelAnchors::Abc { a, b, c }) => {
            Some(projection_price(a, b, c, ratio, direction))
        }
        _ => None,
    }
}

/// All levels of one strategy for one timeframe
pub fn calculate_levels(
    strategy: LevelStrategy,
    anchors: LevelAnchors,
    direction: Direction,
    timeframe: &str,
    extended: bool,
) -> Vec<WorkflowLevel> {
    strategy
        .ratios(extended)
        .into_iter()
        .filter_map(|ratio| {
            level_price(strategy, anchors, ratio, direction)
                .map(|price| WorkflowLevel::new(strategy, ratio, price, timeframe, direction))
        })
        .collect()
}

/// Anchors for `strategy` taken from a timeframe's pivots: the most recent
/// swing high and low, or the ABC structure for projections
pub fn anchors_from_pivots(strategy: LevelStrategy, pivots: &[ManagedPivot]) -> Option<LevelAnchors> {
    match strategy {
        LevelStrategy::Projection => {
            abc_prices(pivots).map(|(a, b, c)| LevelAnchors::Abc { a, b, c })
        }
        _ => {
            let latest = |kind: PivotType| {
                pivots
                    .iter()
                    .filter(|p| p.point.pivot_type == kind)
                    .max_by_key(|p| p.point.index)
                    .map(|p| p.point.price)
            };
            let high = latest(PivotType::High)?;
            let low = latest(PivotType::Low)?;
            (high > low).then_some(LevelAnchors::Swing { high, low })
        }
    }
}

/// Levels for every requested strategy that the timeframe's pivots support
pub fn levels_from_pivots(
    timeframe: &str,
    pivots: &[ManagedPivot],
    strategies: &[LevelStrategy],
    direction: Direction,
    extended: bool,
) -> Vec<WorkflowLevel> {
    strategies
        .iter()
        .filter_map(|&strategy| {
            anchors_from_pivots(strategy, pivots)
                .map(|anchors| calculate_levels(strategy, anchors, direction, timeframe, extended))
        })
        .flatten()
        .collect()
}
