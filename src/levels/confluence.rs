//! Price confluence across timeframes and strategies
//!
//! Two levels are near when `|a - b| <= a * tolerance / 100`, measured from
//! the first level. Zones are built greedily from the lowest unclaimed level
//! upward: the anchor gathers every unclaimed level near it, all of them
//! become claimed, and the cluster is kept only if it has two or more
//! members. Membership is single-linkage from the anchor, so a level just
//! outside one anchor's window never joins a later zone through a neighbour.

use serde::{Deserialize, Serialize};

use super::calc::WorkflowLevel;
use crate::types::Direction;

/// Default tolerance, percent of price
pub const DEFAULT_TOLERANCE_PCT: f64 = 0.5;

/// Levels needed before a level counts as confluent
const MIN_CONFLUENCE_COUNT: usize = 2;

/// Members needed for a zone
const MIN_ZONE_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluenceZone {
    pub id: String,
    /// Average member price
    pub price: f64,
    pub levels: Vec<WorkflowLevel>,
    /// Majority member direction, ties go long
    pub direction: Direction,
    /// Member count
    pub strength: usize,
}

impl ConfluenceZone {
    pub fn low(&self) -> f64 {
        self.levels.iter().map(|l| l.price).fold(f64::INFINITY, f64::min)
    }

    pub fn high(&self) -> f64 {
        self.levels.iter().map(|l| l.price).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Timeframes contributing to the zone, deduplicated in member order
    pub fn timeframes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for level in &self.levels {
            if !out.contains(&level.timeframe.as_str()) {
                out.push(&level.timeframe);
            }
        }
        out
    }
}

pub fn is_near(anchor: f64, other: f64, tolerance_pct: f64) -> bool {
    (anchor - other).abs() <= anchor * tolerance_pct / 100.0
}

/// Set `confluence_count` / `is_confluence` on every level
pub fn mark_confluence(levels: &mut [WorkflowLevel], tolerance_pct: f64) {
    let prices: Vec<f64> = levels.iter().map(|l| l.price).collect();
    for (i, level) in levels.iter_mut().enumerate() {
        let count = prices
            .iter()
            .enumerate()
            .filter(|&(j, &other)| j != i && is_near(prices[i], other, tolerance_pct))
            .count();
        level.confluence_count = count;
        level.is_confluence = count >= MIN_CONFLUENCE_COUNT;
    }
}

/// Greedy zone clustering; each level lands in at most one zone
pub fn detect_confluence_zones(levels: &[WorkflowLevel], tolerance_pct: f64) -> Vec<ConfluenceZone> {
    let mut order: Vec<usize> = (0..levels.len()).collect();
    order.sort_by(|&a, &b| levels[a].price.total_cmp(&levels[b].price));

    let mut claimed = vec![false; levels.len()];
    let mut zones = Vec::new();

    for (pos, &anchor) in order.iter().enumerate() {
        if claimed[anchor] {
            continue;
        }
        claimed[anchor] = true;

        let anchor_price = levels[anchor].price;
        let mut members = vec![anchor];
        for &candidate in &order[pos + 1..] {
            if !claimed[candidate] && is_near(anchor_price, levels[candidate].price, tolerance_pct) {
                claimed[candidate] = true;
                members.push(candidate);
            }
        }

        if members.len() < MIN_ZONE_SIZE {
            continue;
        }

        let member_levels: Vec<WorkflowLevel> = members.iter().map(|&i| levels[i].clone()).collect();
        let price = member_levels.iter().map(|l| l.price).sum::<f64>() / member_levels.len() as f64;
        let longs = member_levels
            .iter()
            .filter(|l| l.direction == Direction::Long)
            .count();
        let shorts = member_levels.len() - longs;
        let direction = if shorts > longs { Direction::Short } else { Direction::Long };

        zones.push(ConfluenceZone {
            id: format!("zone-{}", zones.len() + 1),
            price,
            strength: member_levels.len(),
            levels: member_levels,
            direction,
        });
    }

    zones
}
