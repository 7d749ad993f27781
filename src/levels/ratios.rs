//! Fixed ratio tables per strategy

use serde::{Deserialize, Serialize};

/// Fibonacci level family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LevelStrategy {
    #[default]
    Retracement,
    Extension,
    Expansion,
    Projection,
}

impl LevelStrategy {
    pub const ALL: [LevelStrategy; 4] = [
        LevelStrategy::Retracement,
        LevelStrategy::Extension,
        LevelStrategy::Expansion,
        LevelStrategy::Projection,
    ];

    /// Short tag used in level labels
    pub fn tag(&self) -> &'static str {
        match self {
            LevelStrategy::Retracement => "RET",
            LevelStrategy::Extension => "EXT",
            LevelStrategy::Expansion => "EXP",
            LevelStrategy::Projection => "PRJ",
        }
    }

    pub fn primary_ratios(&self) -> &'static [f64] {
        match self {
            LevelStrategy::Retracement => &[0.382, 0.5, 0.618, 0.786],
            LevelStrategy::Extension => &[1.272, 1.618, 2.618],
            LevelStrategy::Expansion => &[0.618, 1.0, 1.618],
            LevelStrategy::Projection => &[0.618, 0.786, 1.0, 1.272, 1.618],
        }
    }

    pub fn extended_ratios(&self) -> &'static [f64] {
        match self {
            LevelStrategy::Retracement => &[0.236, 0.886],
            LevelStrategy::Extension => &[1.414, 2.0, 3.618],
            LevelStrategy::Expansion => &[0.382, 2.618],
            LevelStrategy::Projection => &[2.0, 2.618],
        }
    }

    /// Ratios in ascending order, optionally including the extended set
    pub fn ratios(&self, extended: bool) -> Vec<f64> {
        let mut ratios = self.primary_ratios().to_vec();
        if extended {
            ratios.extend_from_slice(self.extended_ratios());
            ratios.sort_by(|a, b| a.total_cmp(b));
        }
        ratios
    }
}

impl std::fmt::Display for LevelStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelStrategy::Retracement => write!(f, "retracement"),
            LevelStrategy::Extension => write!(f, "extension"),
            LevelStrategy::Expansion => write!(f, "expansion"),
            LevelStrategy::Projection => write!(f, "projection"),
        }
    }
}

impl std::str::FromStr for LevelStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retracement" | "ret" => Ok(LevelStrategy::Retracement),
            "extension" | "ext" => Ok(LevelStrategy::Extension),
            "expansion" | "exp" => Ok(LevelStrategy::Expansion),
            "projection" | "prj" => Ok(LevelStrategy::Projection),
            other => Err(anyhow::anyhow!("Unknown level strategy '{}'", other)),
        }
    }
}
