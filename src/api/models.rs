//! Analysis API Data Models
//!
//! Request and response types for the market-data, pivot-detection,
//! Fibonacci and harmonic-validation endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Direction, Ohlc, PivotType};

// ============================================================================
// Pivot detection
// ============================================================================

/// Request body for `POST pivot/detect`
#[derive(Debug, Clone, Serialize)]
pub struct PivotDetectRequest {
    pub data: Vec<Ohlc>,
    pub lookback: usize,
    pub count: usize,
}

/// A pivot as reported by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPivot {
    pub index: usize,
    pub price: f64,
    #[serde(rename = "type")]
    pub pivot_type: PivotType,
}

/// Response from `POST pivot/detect`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PivotDetectResponse {
    #[serde(default)]
    pub pivots: Vec<DetectedPivot>,
    #[serde(default)]
    pub swing_high: Option<f64>,
    #[serde(default)]
    pub swing_low: Option<f64>,
    #[serde(default)]
    pub swing_endpoint: Option<DetectedPivot>,
}

// ============================================================================
// Fibonacci levels
// ============================================================================

/// Endpoint family under `fibonacci/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FibonacciKind {
    Retracement,
    Extension,
}

impl FibonacciKind {
    pub fn path(&self) -> &'static str {
        match self {
            FibonacciKind::Retracement => "retracement",
            FibonacciKind::Extension => "extension",
        }
    }
}

/// Request body for `POST fibonacci/{kind}`
#[derive(Debug, Clone, Serialize)]
pub struct FibonacciRequest {
    pub high: f64,
    pub low: f64,
    /// "buy" or "sell"
    pub direction: String,
}

impl FibonacciRequest {
    pub fn new(high: f64, low: f64, direction: Direction) -> Self {
        let side = match direction {
            Direction::Long => "buy",
            Direction::Short => "sell",
        };
        Self {
            high,
            low,
            direction: side.to_string(),
        }
    }
}

/// Response from `POST fibonacci/{kind}`: ratio key -> price
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FibonacciResponse {
    #[serde(default)]
    pub levels: BTreeMap<String, f64>,
}

impl FibonacciResponse {
    /// Levels keyed by numeric ratio, sorted by ratio. Unparseable keys are skipped.
    pub fn ratio_levels(&self) -> Vec<(f64, f64)> {
        let mut out: Vec<(f64, f64)> = self
            .levels
            .iter()
            .filter_map(|(key, price)| parse_ratio_key(key).map(|r| (r, *price)))
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        out
    }
}

/// Parse ratio keys such as `"0.618"`, `"level_618"` or `"1618"`
pub fn parse_ratio_key(key: &str) -> Option<f64> {
    let digits = key.trim_start_matches(|c: char| !c.is_ascii_digit());
    let value: f64 = digits.parse().ok()?;
    if digits.contains('.') || value < 10.0 {
        Some(value)
    } else {
        Some(value / 1000.0)
    }
}

// ============================================================================
// Harmonic validation
// ============================================================================

/// Request body for `POST harmonic/validate`
#[derive(Debug, Clone, Serialize)]
pub struct HarmonicValidateRequest {
    pub x: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

/// A validated harmonic pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonicPattern {
    #[serde(alias = "pattern", alias = "type")]
    pub name: String,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "prz")]
    pub completion_price: Option<f64>,
}
