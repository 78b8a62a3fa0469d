//! Claim Arbiter
//!
//! Exactly-once settlement for competitive reward drops. Two registries are
//! kept: regular drops (fixed reward of 1) and bounties (operator-announced,
//! variable reward). DashMap's sharded locks make a claim attempt a single
//! atomic compare-and-remove, so when many claimants race on one event,
//! exactly one of them observes success and the rest see it as already gone.

use dashmap::DashMap;
use std::time::Instant;
use tracing::debug;

/// Identifier of a claimable event (the announcing message's id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A drop awaiting its first claimant
#[derive(Debug)]
struct PendingDrop {
    reward: u64,
    created_at: Instant,
}

/// Registries of claimable events. Removal from a registry IS the
/// arbitration decision: once an event is gone it cannot be revived.
#[derive(Debug, Default)]
pub struct ClaimArbiter {
    /// Regular drops, reward fixed at 1 unit
    drops: DashMap<EventId, PendingDrop>,
    /// Operator-announced bounties with a variable reward
    bounties: DashMap<EventId, PendingDrop>,
}

impl ClaimArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a regular drop (reward = 1)
    pub fn announce_drop(&self, id: EventId) {
        self.drops.insert(
            id,
            PendingDrop {
                reward: 1,
                created_at: Instant::now(),
            },
        );
    }

    /// Register a bounty with an explicit reward (must be at least 1)
    pub fn announce_bounty(&self, id: EventId, reward: u64) {
        debug_assert!(reward >= 1, "bounty reward must be at least 1");
        self.bounties.insert(
            id,
            PendingDrop {
                reward: reward.max(1),
                created_at: Instant::now(),
            },
        );
    }

    /// Attempt to claim an event. Returns the reward on success, `None` if
    /// the event was never announced or someone else already claimed it.
    ///
    /// `DashMap::remove` takes the shard lock once, so the check and the
    /// removal are one indivisible step - no check-then-delete race.
    pub fn try_claim(&self, id: &EventId) -> Option<u64> {
        if let Some((_, drop)) = self.drops.remove(id) {
            debug!(event = %id, age_ms = drop.created_at.elapsed().as_millis() as u64, "Drop claimed");
            return Some(drop.reward);
        }
        if let Some((_, bounty)) = self.bounties.remove(id) {
            debug!(
                event = %id,
                reward = bounty.reward,
                age_ms = bounty.created_at.elapsed().as_millis() as u64,
                "Bounty claimed"
            );
            return Some(bounty.reward);
        }
        None
    }

    /// Number of unclaimed regular drops
    pub fn pending_drops(&self) -> usize {
        self.drops.len()
    }

    /// Number of unclaimed bounties
    pub fn pending_bounties(&self) -> usize {
        self.bounties.len()
    }
}
