//! Simulation state, step reports and the determinism hash.

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

use crate::conflict::ConflictResolver;
use crate::id::{KindTag, TransitionId};
use crate::marking::Marking;
use crate::net::Net;
use crate::rng::SimRng;
use crate::transition::TransitionState;

// ---------------------------------------------------------------------------
// Controller state
// ---------------------------------------------------------------------------

/// Lifecycle of a simulation.
///
/// `Idle` means time is at zero and nothing has fired. `Running` means
/// the caller is stepping. `Started` means time has advanced but stepping
/// is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Running,
    Started,
}

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// All mutable state of a run. The topology lives in [`Net`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub time: f64,
    pub marking: Marking,
    pub transitions: SecondaryMap<TransitionId, TransitionState>,
    pub rng: SimRng,
    pub resolver: ConflictResolver,
    pub controller: ControllerState,
    /// Completed steps since the last reset.
    pub steps: u64,
}

impl SimulationState {
    /// State at time zero with initial markings and fresh transition state.
    pub fn initial(net: &Net, seed: u64) -> Self {
        let mut transitions = SecondaryMap::new();
        for (id, t) in net.transitions() {
            transitions.insert(id, TransitionState::new(&t.kind));
        }
        Self {
            time: 0.0,
            marking: net.initial_marking(),
            transitions,
            rng: SimRng::new(seed),
            resolver: ConflictResolver::new(),
            controller: ControllerState::Idle,
            steps: 0,
        }
    }

    /// Deterministic hash over time, markings, enablement and RNG state.
    pub fn hash(&self, net: &Net) -> u64 {
        let mut h = StateHash::new();
        h.write_f64(self.time);
        h.write_u64(self.steps);
        for (id, _) in net.places() {
            h.write_f64(self.marking.get(id));
        }
        for (id, _) in net.transitions() {
            if let Some(ts) = self.transitions.get(id) {
                h.write_f64(ts.enabled_since.unwrap_or(-1.0));
                h.write_f64(ts.scheduled_at().unwrap_or(-1.0));
                h.write_u64(ts.firings);
            }
        }
        h.write_u64(self.rng.state());
        h.finish()
    }
}

// ---------------------------------------------------------------------------
// Step reports
// ---------------------------------------------------------------------------

/// Phase of the step pipeline in which a firing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Immediate,
    Scheduled,
    Continuous,
}

/// One discrete firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringRecord {
    pub transition: TransitionId,
    pub kind: KindTag,
    pub phase: Phase,
    /// Simulated instant of the firing.
    pub time: f64,
}

/// Continuous flow integrated over one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub transition: TransitionId,
    pub rate: f64,
    pub dt: f64,
}

/// The immediate-firing loop hit its ceiling with transitions still enabled.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("immediate firing stopped after {limit} iterations at t={time} with {} transition(s) still enabled", .still_enabled.len())]
pub struct IterationLimitWarning {
    pub limit: u32,
    pub time: f64,
    pub still_enabled: Vec<TransitionId>,
}

/// Non-fatal conditions surfaced by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepWarning {
    IterationLimit(IterationLimitWarning),
    /// A timed transition was still enabled after its window closed.
    WindowExpired {
        transition: TransitionId,
        deadline: f64,
        fired: bool,
    },
}

/// Everything that happened during one `step` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub dt: f64,
    /// Time after the step.
    pub time: f64,
    pub firings: Vec<FiringRecord>,
    pub flows: Vec<FlowRecord>,
    pub warnings: Vec<StepWarning>,
    /// False when the step was skipped because the simulation is paused.
    pub advanced: bool,
}

impl StepReport {
    pub fn fired_count(&self, transition: TransitionId) -> usize {
        self.firings
            .iter()
            .filter(|f| f.transition == transition)
            .count()
    }

    pub fn hit_iteration_limit(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, StepWarning::IterationLimit(_)))
    }
}

/// Outcome of `Simulation::run_to_end`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub firings: u64,
    pub warnings: Vec<StepWarning>,
    pub final_time: f64,
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for replay checks.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    /// Start a new hash.
    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Feed an f64 by bit pattern.
    pub fn write_f64(&mut self, v: f64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    /// Finalize and return the hash value.
    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
