//! Position state for sequential trading.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-symbol position state.
///
/// Derived from the signed broker quantity: zero is flat, positive is
/// long, negative is short. The canonical representation stores the
/// magnitude separately and tags it with this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

impl PositionState {
    /// Derive the state from a signed quantity.
    pub fn from_signed(quantity: i64) -> Self {
        match quantity {
            0 => Self::Flat,
            q if q > 0 => Self::Long,
            _ => Self::Short,
        }
    }

    /// Returns the sign of the position: 0, +1 or -1.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Flat => 0,
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_signed() {
        assert_eq!(PositionState::from_signed(0), PositionState::Flat);
        assert_eq!(PositionState::from_signed(100), PositionState::Long);
        assert_eq!(PositionState::from_signed(-50), PositionState::Short);
    }

    #[test]
    fn test_sign_roundtrip() {
        for state in [PositionState::Flat, PositionState::Long, PositionState::Short] {
            assert_eq!(PositionState::from_signed(state.sign() * 10), state);
        }
        assert_eq!(PositionState::from_signed(PositionState::Flat.sign()), PositionState::Flat);
    }
}
