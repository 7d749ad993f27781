//! Single-workflow record

use serde::{Deserialize, Serialize};

use crate::levels::{LevelStrategy, WorkflowLevel};
use crate::types::{now_ms, Direction, PivotPoint};

/// Number of workflow steps
pub const TOTAL_STEPS: usize = 8;

/// The eight workflow steps, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Step {
    Market = 1,
    Trend = 2,
    Fibonacci = 3,
    Patterns = 4,
    Entry = 5,
    Position = 6,
    Checklist = 7,
    Manage = 8,
}

impl Step {
    pub const ALL: [Step; TOTAL_STEPS] = [
        Step::Market,
        Step::Trend,
        Step::Fibonacci,
        Step::Patterns,
        Step::Entry,
        Step::Position,
        Step::Checklist,
        Step::Manage,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Step> {
        Step::ALL.get((n as usize).checked_sub(1)?).copied()
    }

    pub fn previous(self) -> Option<Step> {
        Step::from_number(self.number() - 1)
    }

    pub fn next(self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::Market => "Market & Timeframe",
            Step::Trend => "Trend Check",
            Step::Fibonacci => "Fibonacci Setup",
            Step::Patterns => "Pattern & Signal Scan",
            Step::Entry => "Entry Confirmation",
            Step::Position => "Position Sizing",
            Step::Checklist => "Pre-Trade Checklist",
            Step::Manage => "Trade Management",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {}", self.number(), self.title())
    }
}

impl Serialize for Step {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

/// Trend read on one timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Neutral,
}

impl std::str::FromStr for Trend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Trend::Up),
            "down" => Ok(Trend::Down),
            "neutral" | "sideways" | "ranging" => Ok(Trend::Neutral),
            other => Err(anyhow::anyhow!("Unknown trend '{}'", other)),
        }
    }
}

/// Decision derived from the higher/lower timeframe trends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDirection {
    GoLong,
    GoShort,
    #[default]
    StandAside,
}

impl TradeDirection {
    pub fn direction(self) -> Option<Direction> {
        match self {
            TradeDirection::GoLong => Some(Direction::Long),
            TradeDirection::GoShort => Some(Direction::Short),
            TradeDirection::StandAside => None,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::GoLong => write!(f, "GO_LONG"),
            TradeDirection::GoShort => write!(f, "GO_SHORT"),
            TradeDirection::StandAside => write!(f, "STAND_ASIDE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoNoGo {
    Go,
    NoGo,
    #[default]
    Pending,
}

impl std::fmt::Display for GoNoGo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoNoGo::Go => write!(f, "GO"),
            GoNoGo::NoGo => write!(f, "NO_GO"),
            GoNoGo::Pending => write!(f, "PENDING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Planning,
    Open,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    pub required: bool,
    #[serde(default)]
    pub checked: bool,
}

impl ChecklistItem {
    fn new(id: &str, label: &str, required: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            required,
            checked: false,
        }
    }
}

/// Seven-item pre-trade checklist, four of them required
pub fn default_checklist() -> Vec<ChecklistItem> {
    vec![
        ChecklistItem::new("trend-aligned", "Higher timeframe trend supports the trade", true),
        ChecklistItem::new("at-fib-level", "Price is reacting at a key Fibonacci level", true),
        ChecklistItem::new("entry-signal", "Entry signal bar has closed", true),
        ChecklistItem::new("risk-defined", "Stop loss placed and risk within plan", true),
        ChecklistItem::new("confluence", "Level has multi-timeframe confluence", false),
        ChecklistItem::new("pattern", "Harmonic or chart pattern supports the trade", false),
        ChecklistItem::new("news-checked", "No high-impact news due", false),
    ]
}

/// Harmonic or chart pattern found during the scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedPattern {
    pub name: String,
    pub timeframe: String,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub completion_price: Option<f64>,
}

/// Candle signal kinds recognised by the scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    PinBar,
    Engulfing,
    InsideBarBreak,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::PinBar => write!(f, "pin bar"),
            SignalKind::Engulfing => write!(f, "engulfing"),
            SignalKind::InsideBarBreak => write!(f, "inside bar break"),
        }
    }
}

/// A candle that qualifies as an entry trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBar {
    pub kind: SignalKind,
    pub bar_index: usize,
    pub direction: Direction,
    /// Suggested entry (signal bar extreme in trade direction)
    pub trigger_price: f64,
    /// Suggested stop (opposite extreme)
    pub invalidation_price: f64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLogEntry {
    pub timestamp: i64,
    pub message: String,
}

/// Full state of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowState {
    // Progress
    pub current_step: u8,
    pub completed_steps: Vec<u8>,

    // Step 1 - market
    pub symbol: String,
    pub higher_timeframe: String,
    pub lower_timeframe: String,

    // Step 2 - trend
    pub higher_trend: Trend,
    pub lower_trend: Trend,
    pub trade_direction: TradeDirection,

    // Step 3 - Fibonacci
    pub pivots: Vec<PivotPoint>,
    pub fib_tool: LevelStrategy,
    pub fib_levels: Vec<WorkflowLevel>,
    pub selected_level: Option<String>,

    // Step 4 - patterns and signals
    pub pattern_scan_complete: bool,
    pub detected_patterns: Vec<DetectedPattern>,
    pub signals: Vec<SignalBar>,

    // Step 5 - entry
    pub entry_signal: Option<SignalBar>,
    pub entry_confirmed: bool,

    // Step 6 - position
    pub entry_price: f64,
    pub stop_loss: f64,
    pub targets: Vec<f64>,
    pub account_balance: f64,
    pub risk_percent: f64,
    pub position_size: f64,
    pub risk_reward_ratio: f64,

    // Step 7 - checklist
    pub checklist: Vec<ChecklistItem>,
    pub go_no_go: GoNoGo,

    // Step 8 - management
    pub trade_status: TradeStatus,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub trade_log: Vec<TradeLogEntry>,

    pub last_updated: i64,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            current_step: Step::Market.number(),
            completed_steps: Vec::new(),
            symbol: String::new(),
            higher_timeframe: "1D".to_string(),
            lower_timeframe: "4H".to_string(),
            higher_trend: Trend::Neutral,
            lower_trend: Trend::Neutral,
            trade_direction: TradeDirection::StandAside,
            pivots: Vec::new(),
            fib_tool: LevelStrategy::Retracement,
            fib_levels: Vec::new(),
            selected_level: None,
            pattern_scan_complete: false,
            detected_patterns: Vec::new(),
            signals: Vec::new(),
            entry_signal: None,
            entry_confirmed: false,
            entry_price: 0.0,
            stop_loss: 0.0,
            targets: Vec::new(),
            account_balance: 10_000.0,
            risk_percent: 1.0,
            position_size: 0.0,
            risk_reward_ratio: 0.0,
            checklist: default_checklist(),
            go_no_go: GoNoGo::Pending,
            trade_status: TradeStatus::Planning,
            exit_price: None,
            pnl: None,
            trade_log: Vec::new(),
            last_updated: now_ms(),
        }
    }
}

impl WorkflowState {
    pub fn step(&self) -> Step {
        Step::from_number(self.current_step).unwrap_or(Step::Market)
    }

    pub fn is_completed(&self, step: Step) -> bool {
        self.completed_steps.contains(&step.number())
    }

    /// Distinct completed steps within 1..=8
    pub fn completed_count(&self) -> usize {
        Step::ALL.iter().filter(|s| self.is_completed(**s)).count()
    }
}
