//! State machine definitions for charging sessions.
//!
//! Each EVSE cycles Idle -> Charging -> Idle; every session it runs is a
//! transaction that goes Started -> Ended exactly once.

use serde::{Deserialize, Serialize};

/// Per-EVSE charging session automaton. Re-enterable, no terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargingState {
    /// No transaction bound.
    #[default]
    Idle,
    /// A transaction is bound and energy may flow.
    Charging,
}

impl ChargingState {
    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [ChargingState] {
        match self {
            Self::Idle => &[Self::Charging],
            Self::Charging => &[Self::Idle],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: ChargingState) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_charging(&self) -> bool {
        matches!(self, Self::Charging)
    }
}

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Started,
    /// Terminal.
    Ended,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    pub fn valid_transitions(&self) -> &'static [TransactionState] {
        match self {
            Self::Started => &[Self::Ended],
            Self::Ended => &[],
        }
    }

    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Events that drive charging state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingEvent {
    /// Remote start accepted.
    StartAccepted,
    /// Remote stop accepted.
    StopAccepted,
}

impl ChargingEvent {
    /// Target state of this event.
    pub fn target(&self) -> ChargingState {
        match self {
            Self::StartAccepted => ChargingState::Charging,
            Self::StopAccepted => ChargingState::Idle,
        }
    }
}
