//! Fibonacci level engine
//!
//! - [`ratios`] - ratio tables per strategy
//! - [`calc`] - price formulas and level generation from pivots
//! - [`confluence`] - confluence marking and zone clustering
//! - [`service`] - multi-timeframe refresh with latest-wins semantics

pub mod calc;
pub mod confluence;
pub mod ratios;
pub mod service;

pub use calc::{
    anchors_from_pivots, calculate_levels, expansion_price, extension_price, level_price,
    levels_from_pivots, projection_price, retracement_price, LevelAnchors, WorkflowLevel,
};
pub use confluence::{detect_confluence_zones, is_near, mark_confluence, ConfluenceZone, DEFAULT_TOLERANCE_PCT};
pub use ratios::LevelStrategy;
pub use service::{LevelService, LevelSet, LevelSettings};
