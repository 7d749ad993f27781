//! Swing pivots per symbol and timeframe: manual editing, detection through
//! the analysis backend, refresh locking and ABC labeling.

pub mod labeling;
pub mod manager;

pub use labeling::{abc_prices, label_abc, AbcLabel};
pub use manager::{pivot_id, ManagedPivot, NewPivot, PivotManager, TimeframePivotData};
