//! Sequential trading transition table.
//!
//! A symbol's position must alternate between flat and a single
//! directional state. Add-to-position semantics are disallowed: the
//! upstream signal source emits strictly alternating enter/exit pairs,
//! so a rejected transition indicates desynchronization that only a
//! fresh signal or operator intervention can cure.

use crate::error::TradeError;
use crate::position::PositionState;
use crate::signal::TradeAction;

/// Validate a requested action against the current position state.
///
/// | State | buy    | sell   | short  | cover  |
/// |-------|--------|--------|--------|--------|
/// | flat  | accept | reject | accept | reject |
/// | long  | reject | accept | reject | reject |
/// | short | reject | reject | reject | accept |
pub fn validate_transition(state: PositionState, action: TradeAction) -> Result<(), TradeError> {
    let accepted = matches!(
        (state, action),
        (PositionState::Flat, TradeAction::Buy)
            | (PositionState::Flat, TradeAction::Short)
            | (PositionState::Long, TradeAction::Sell)
            | (PositionState::Short, TradeAction::Cover)
    );

    if accepted {
        Ok(())
    } else {
        Err(TradeError::InvalidTransition { state, action })
    }
}
