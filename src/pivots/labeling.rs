//! ABC labeling of the most recent swing structure
//!
//! Walking back from the newest pivot: `C` is the newest, `B` the nearest
//! earlier pivot of the opposite kind, `A` the nearest pivot before `B` of the
//! same kind as `C`. Anything short of a full A-B-C leaves the input unlabeled.

use serde::{Deserialize, Serialize};

use super::manager::ManagedPivot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbcLabel {
    A,
    B,
    C,
}

impl std::fmt::Display for AbcLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbcLabel::A => write!(f, "A"),
            AbcLabel::B => write!(f, "B"),
            AbcLabel::C => write!(f, "C"),
        }
    }
}

/// Positions (into the input slice) of A, B and C
fn find_abc(pivots: &[ManagedPivot]) -> Option<(usize, usize, usize)> {
    if pivots.len() < 3 {
        return None;
    }

    let mut order: Vec<usize> = (0..pivots.len()).collect();
    order.sort_by(|&a, &b| pivots[b].point.index.cmp(&pivots[a].point.index));

    let c = order[0];
    let c_type = pivots[c].point.pivot_type;

    let b_pos = order
        .iter()
        .skip(1)
        .position(|&i| pivots[i].point.pivot_type != c_type)?
        + 1;
    let b = order[b_pos];

    let a = *order
        .iter()
        .skip(b_pos + 1)
        .find(|&&i| pivots[i].point.pivot_type == c_type)?;

    Some((a, b, c))
}

/// Copy of `pivots` with A/B/C labels applied (all other labels cleared)
pub fn label_abc(pivots: &[ManagedPivot]) -> Vec<ManagedPivot> {
    let mut out: Vec<ManagedPivot> = pivots
        .iter()
        .cloned()
        .map(|mut p| {
            p.abc_label = None;
            p
        })
        .collect();

    if let Some((a, b, c)) = find_abc(pivots) {
        out[a].abc_label = Some(AbcLabel::A);
        out[b].abc_label = Some(AbcLabel::B);
        out[c].abc_label = Some(AbcLabel::C);
    }
    out
}

/// Prices of the labelled A, B and C pivots, if a full structure exists
pub fn abc_prices(pivots: &[ManagedPivot]) -> Option<(f64, f64, f64)> {
    let (a, b, c) = find_abc(pivots)?;
    Some((pivots[a].point.price, pivots[b].point.price, pivots[c].point.price))
}
