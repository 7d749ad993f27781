use serde::{Deserialize, Serialize};

/// Timeframe label as used by the market-data collaborator ("1D", "4H", "15m", ...)
pub type Timeframe = String;

/// Trade direction used by level formulas ("buy" = long, "sell" = short)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "buy")]
    Long,
    #[serde(alias = "sell")]
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1.0 for long, -1.0 for short
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "Long"),
            Direction::Short => write!(f, "Short"),
        }
    }
}

/// Swing pivot kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotType {
    High,
    Low,
}

impl PivotType {
    pub fn opposite(self) -> Self {
        match self {
            PivotType::High => PivotType::Low,
            PivotType::Low => PivotType::High,
        }
    }
}

impl std::fmt::Display for PivotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PivotType::High => write!(f, "high"),
            PivotType::Low => write!(f, "low"),
        }
    }
}

/// Per-timeframe trend classification stored alongside pivots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Long,
    Short,
    #[default]
    Ranging,
}

/// A swing point: bar offset, price and kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotPoint {
    pub index: usize,
    pub price: f64,
    #[serde(rename = "type")]
    pub pivot_type: PivotType,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub is_manual: bool,
}

/// OHLC bar returned by the market-data collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    /// Epoch milliseconds
    #[serde(alias = "time")]
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Current epoch time in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
