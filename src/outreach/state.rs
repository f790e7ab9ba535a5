//! Scheduled send state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ContactId;

/// Identifier of a scheduled send. Allocated monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SendHandle(pub u64);

impl fmt::Display for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a scheduled send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    /// Waiting for its fire time; may still be cancelled.
    Pending,
    /// Dispatch has begun and will run to completion.
    Dispatching,
    /// Dispatched and appended to the outbound log.
    Fired,
    /// The dispatcher reported an error.
    Failed,
    /// Cancelled before dispatch began.
    Cancelled,
    /// The lead was DNC at dispatch time; nothing was sent.
    Suppressed,
}

impl SendState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SendState) -> bool {
        use SendState::*;

        matches!(
            (self, target),
            (Pending, Dispatching) | (Pending, Cancelled) |
            (Dispatching, Fired) | (Dispatching, Failed) | (Dispatching, Suppressed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fired | Self::Failed | Self::Cancelled | Self::Suppressed
        )
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Fired => "fired",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Suppressed => "suppressed",
        };
        write!(f, "{s}")
    }
}

/// Request to send `body` to `contact_id` at `fire_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub contact_id: ContactId,
    pub body: String,
    pub fire_at: DateTime<Utc>,
}

/// A send owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSend {
    pub handle: SendHandle,
    pub contact_id: ContactId,
    pub body: String,
    pub fire_at: DateTime<Utc>,
    pub state: SendState,
    pub created_at: DateTime<Utc>,
    /// When the send reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Dispatch failure or suppression reason.
    pub last_error: Option<String>,
}

impl ScheduledSend {
    pub fn new(handle: SendHandle, request: SendRequest) -> Self {
        Self {
            handle,
            contact_id: request.contact_id,
            body: request.body,
            fire_at: request.fire_at,
            state: SendState::Pending,
            created_at: Utc::now(),
            finished_at: None,
            last_error: None,
        }
    }

    /// Transition to a new state.
    pub fn transition_to(
        &mut self,
        new_state: SendState,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition send {} from {} to {}",
                self.handle, self.state, new_state
            ));
        }

        self.state = new_state;
        if new_state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        if reason.is_some() {
            self.last_error = reason;
        }
        Ok(())
    }
}
