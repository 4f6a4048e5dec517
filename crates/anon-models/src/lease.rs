//! Lease lifecycle of a work item, seen from the consuming worker.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Lease state of a work item.
///
/// `Unclaimed -> Leased -> Completed`, or `Leased -> Expired -> Unclaimed`
/// when the lease runs out before completion. There is no renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    /// Waiting in the queue
    #[default]
    Unclaimed,
    /// Claimed by exactly one worker
    Leased,
    /// Acknowledged as permanently processed
    Completed,
    /// Lease ran out; waiting to be reclaimed
    Expired,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Unclaimed => "unclaimed",
            LeaseState::Leased => "leased",
            LeaseState::Completed => "completed",
            LeaseState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeaseState::Completed)
    }

    /// Claim the item.
    pub fn lease(self) -> ModelResult<Self> {
        self.transition(LeaseState::Leased, matches!(self, LeaseState::Unclaimed))
    }

    /// Acknowledge the item.
    ///
    /// Completing an already completed or expired item is a no-op that leaves
    /// the state unchanged.
    pub fn complete(self) -> Self {
        match self {
            LeaseState::Leased => LeaseState::Completed,
            other => other,
        }
    }

    /// Mark the lease as run out.
    pub fn expire(self) -> ModelResult<Self> {
        self.transition(LeaseState::Expired, matches!(self, LeaseState::Leased))
    }

    /// Return an expired item to the queue.
    pub fn reclaim(self) -> ModelResult<Self> {
        self.transition(LeaseState::Unclaimed, matches!(self, LeaseState::Expired))
    }

    fn transition(self, to: LeaseState, allowed: bool) -> ModelResult<Self> {
        if allowed {
            Ok(to)
        } else {
            Err(ModelError::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}
