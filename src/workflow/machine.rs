//! Step gating
//!
//! Moving back (or staying) is always allowed. Moving forward only checks
//! the step immediately before the target; on success every step before the
//! target is marked completed.

use serde::Serialize;

use super::reducer::{derive_go_no_go, derive_trade_direction};
use super::state::{GoNoGo, Step, TradeDirection, WorkflowState};

/// Outcome of checking one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepValidation {
    pub step: Step,
    pub valid: bool,
    pub reason: Option<String>,
}

impl StepValidation {
    fn ok(step: Step) -> Self {
        Self {
            step,
            valid: true,
            reason: None,
        }
    }

    fn fail(step: Step, reason: impl Into<String>) -> Self {
        Self {
            step,
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

impl std::fmt::Display for StepValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "Step {}: {}", self.step.number(), reason),
            None => write!(f, "Step {}: ok", self.step.number()),
        }
    }
}

/// Whether `step`'s own requirements are met
pub fn validate_step(state: &WorkflowState, step: Step) -> StepValidation {
    match step {
        Step::Market | Step::Manage => StepValidation::ok(step),
        Step::Trend => {
            if derive_trade_direction(state.higher_trend, state.lower_trend) == TradeDirection::StandAside {
                StepValidation::fail(
                    step,
                    format!(
                        "Trade direction is {}: higher trend must oppose lower trend (UP+DOWN or DOWN+UP)",
                        TradeDirection::StandAside
                    ),
                )
            } else {
                StepValidation::ok(step)
            }
        }
        Step::Fibonacci => {
            if state.pivots.len() < 2 {
                StepValidation::fail(step, "Mark at least two pivots")
            } else if state.fib_levels.is_empty() {
                StepValidation::fail(step, "No Fibonacci levels calculated")
            } else {
                StepValidation::ok(step)
            }
        }
        Step::Patterns => {
            if state.pattern_scan_complete {
                StepValidation::ok(step)
            } else {
                StepValidation::fail(step, "Run the pattern scan")
            }
        }
        Step::Entry => {
            if state.entry_confirmed {
                StepValidation::ok(step)
            } else {
                StepValidation::fail(step, "Confirm an entry signal bar")
            }
        }
        Step::Position => {
            if state.position_size <= 0.0 {
                StepValidation::fail(step, "Position size must be positive")
            } else if state.risk_reward_ratio < 1.0 {
                StepValidation::fail(
                    step,
                    format!("Risk/reward {:.2} is below 1:1", state.risk_reward_ratio),
                )
            } else {
                StepValidation::ok(step)
            }
        }
        Step::Checklist => {
            if state.go_no_go == GoNoGo::NoGo {
                StepValidation::fail(step, "Checklist decision is NO_GO")
            } else if derive_go_no_go(&state.checklist) != GoNoGo::Go {
                StepValidation::fail(step, "Complete every required checklist item")
            } else {
                StepValidation::ok(step)
            }
        }
    }
}

/// Navigate to `target`, returning the new state or the failed validation
pub fn go_to_step(state: &WorkflowState, target: Step, now: i64) -> Result<WorkflowState, StepValidation> {
    let mut next = state.clone();

    if target.number() > state.current_step {
        if let Some(previous) = target.previous() {
            let validation = validate_step(state, previous);
            if !validation.valid {
                return Err(validation);
            }
        }
        for step in Step::ALL.iter().take_while(|s| **s < target) {
            if !next.completed_steps.contains(&step.number()) {
                next.completed_steps.push(step.number());
            }
        }
        next.completed_steps.sort_unstable();
    }

    next.current_step = target.number();
    next.last_updated = now;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::reducer::{reduce, WorkflowPatch};
    use crate::workflow::state::Trend;

    fn at_step_two() -> WorkflowState {
        let state = reduce(&WorkflowState::default(), &WorkflowPatch::market("EURUSD", "1D", "4H"), 1);
        go_to_step(&state, Step::Trend, 2).unwrap()
    }

    #[test]
    fn test_stand_aside_blocks_step_three() {
        let state = at_step_two();
        let state = reduce(&state, &WorkflowPatch::trend(Trend::Up, Trend::Up), 3);

        let err = go_to_step(&state, Step::Fibonacci, 4).unwrap_err();
        assert_eq!(err.step, Step::Trend);
        assert!(err.reason.unwrap().contains("STAND_ASIDE"));
    }

    #[test]
    fn test_forward_marks_prior_steps() {
        let state = at_step_two();
        assert_eq!(state.completed_steps, vec![1]);

        let state = reduce(&state, &WorkflowPatch::trend(Trend::Up, Trend::Down), 3);
        let state = go_to_step(&state, Step::Fibonacci, 4).unwrap();
        assert_eq!(state.current_step, 3);
        assert_eq!(state.completed_steps, vec![1, 2]);
        assert_eq!(state.last_updated, 4);
    }

    #[test]
    fn test_backward_always_allowed() {
        let state = at_step_two();
        let state = go_to_step(&state, Step::Market, 5).unwrap();
        assert_eq!(state.current_step, 1);
        assert_eq!(state.completed_steps, vec![1]);

        let same = go_to_step(&state, Step::Market, 6).unwrap();
        assert_eq!(same.current_step, 1);
    }

    #[test]
    fn test_forward_checks_only_previous_step() {
        // Trend and Fibonacci are unmet, but jumping to step 5 only validates step 4
        let state = reduce(
            &WorkflowState::default(),
            &WorkflowPatch {
                pattern_scan_complete: Some(true),
                ..WorkflowPatch::default()
            },
            1,
        );
        let state = go_to_step(&state, Step::Entry, 2).unwrap();
        assert_eq!(state.completed_steps, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_position_step_requirements() {
        let state = reduce(&WorkflowState::default(), &WorkflowPatch::risk(100.0, 98.0, vec![101.0]), 1);
        let validation = validate_step(&state, Step::Position);
        assert!(!validation.valid);
        assert!(validation.reason.unwrap().contains("below 1:1"));

        let state = reduce(&state, &WorkflowPatch::risk(100.0, 98.0, vec![104.0]), 2);
        assert!(validate_step(&state, Step::Position).valid);
    }

    #[test]
    fn test_defaults_stand_aside_at_step_two() {
        let state = WorkflowState::default();
        assert_eq!(state.current_step, 1);
        assert!(validate_step(&state, Step::Market).valid);

        let validation = validate_step(&state, Step::Trend);
        assert!(!validation.valid);
        assert!(validation.to_string().starts_with("Step 2: Trade direction is STAND_ASIDE"));
    }
}
