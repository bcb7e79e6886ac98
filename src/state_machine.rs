// Copyright 2025 Cowboy AI, LLC.

//! State machine for event record status
//!
//! Event records move through a small Moore-style machine: the allowed
//! targets depend only on the current status.
//!
//! ```text
//! pending  ──► delivered
//!    │
//!    └────► failed ──► retrying ──► delivered
//!             ▲            │
//!             └────────────┘
//! ```
//!
//! `delivered` is terminal. `retrying` can only be entered from `failed`.
//! The retry budget is not part of the machine; the lifecycle controller
//! checks it separately.

use crate::events::EventStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for types that can be used as states in a state machine
pub trait State: Debug + Clone + PartialEq + Eq + Send + Sync {
    /// Get the name of this state for logging/debugging
    fn name(&self) -> &'static str;

    /// Check if this is a terminal state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Transitions whose validity depends only on the current state
///
/// # Examples
///
/// ```rust
/// use cim_event_records::{EventStatus, StateTransitions};
///
/// assert!(EventStatus::Failed.can_transition_to(&EventStatus::Retrying));
/// assert!(!EventStatus::Pending.can_transition_to(&EventStatus::Retrying));
/// assert!(EventStatus::Delivered.valid_transitions().is_empty());
/// ```
pub trait StateTransitions: State {
    /// Check if a transition to the target state is valid
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Get all valid target states from this state
    fn valid_transitions(&self) -> Vec<Self>;
}

impl State for EventStatus {
    fn name(&self) -> &'static str {
        self.as_str()
    }

    fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Delivered)
    }
}

impl StateTransitions for EventStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            EventStatus::Pending => vec![EventStatus::Delivered, EventStatus::Failed],
            EventStatus::Retrying => vec![EventStatus::Delivered, EventStatus::Failed],
            EventStatus::Failed => vec![EventStatus::Retrying],
            EventStatus::Delivered => vec![],
        }
    }
}

/// Record of a status transition applied to one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// The event the transition was applied to
    pub event_id: String,
    /// The status before the transition
    pub from: EventStatus,
    /// The status after the transition
    pub to: EventStatus,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
}

impl StatusTransition {
    /// Record a transition happening now
    pub fn now(event_id: impl Into<String>, from: EventStatus, to: EventStatus) -> Self {
        Self {
            event_id: event_id.into(),
            from,
            to,
            timestamp: Utc::now(),
        }
    }
}
