//! Conflict resolution: the order in which competing transitions attempt to fire.
//!
//! A policy never decides *whether* a transition fires, only the order of
//! attempts. The engine re-checks enablement before every attempt, so a
//! transition whose tokens were taken by an earlier winner is simply
//! skipped.

use serde::{Deserialize, Serialize};

use crate::id::TransitionId;
use crate::rng::SimRng;

/// How simultaneously eligible transitions are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Uniform random order from the seeded RNG.
    #[default]
    Random,
    /// Highest declared priority first, ties in random order.
    Priority,
    /// Rotating start position so transitions take turns across conflicts.
    #[serde(alias = "roundrobin")]
    RoundRobin,
}

/// A transition eligible to fire in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: TransitionId,
    pub priority: i32,
    /// Position in the net's registration order.
    pub index: usize,
}

/// Policy state that persists across steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolver {
    /// Registration index the next round-robin rotation starts from.
    cursor: usize,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Sort `candidates` into attempt order. `transition_count` is the size
    /// of the net, used to rotate round-robin order.
    pub fn order(
        &self,
        policy: ConflictPolicy,
        candidates: &mut [Candidate],
        transition_count: usize,
        rng: &mut SimRng,
    ) {
        match policy {
            ConflictPolicy::Random => rng.shuffle(candidates),
            ConflictPolicy::Priority => {
                rng.shuffle(candidates);
                // Stable: equal priorities keep their shuffled order.
                candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
            }
            ConflictPolicy::RoundRobin => {
                let n = transition_count.max(1);
                let cursor = self.cursor % n;
                candidates.sort_by_key(|c| (c.index + n - cursor) % n);
            }
        }
    }

    /// Choose the next immediate transition: highest priority always wins,
    /// the policy breaks ties among equal priorities.
    pub fn pick_immediate(
        &self,
        policy: ConflictPolicy,
        candidates: &mut Vec<Candidate>,
        transition_count: usize,
        rng: &mut SimRng,
    ) -> Option<Candidate> {
        let top = candidates.iter().map(|c| c.priority).max()?;
        candidates.retain(|c| c.priority == top);
        if candidates.len() > 1 {
            self.order(policy, candidates, transition_count, rng);
        }
        candidates.first().copied()
    }

    /// Advance the round-robin pointer past a transition that just fired.
    pub fn record_firing(&mut self, candidate: &Candidate, transition_count: usize) {
        self.cursor = (candidate.index + 1) % transition_count.max(1);
    }
}
