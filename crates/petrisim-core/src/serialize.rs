//! Binary snapshots of a run.
//!
//! A snapshot holds the settings and the full [`SimulationState`] behind a
//! versioned header, encoded with `bitcode`. The topology is not stored;
//! instead the header carries the net's fingerprint and restoring onto a
//! different net is refused.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behavior::MARKING_EPSILON;
use crate::engine::Simulation;
use crate::net::Net;
use crate::settings::Settings;
use crate::sim::SimulationState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a petrisim snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x5E7F_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("snapshot was taken from a different net (fingerprint 0x{found:016X}, expected 0x{expected:016X})")]
    TopologyMismatch { expected: u64, found: u64 },
    #[error("snapshot carries invalid settings: {0}")]
    InvalidSettings(String),
    #[error("snapshot carries invalid run state: {0}")]
    InvalidState(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Fingerprint of the net the state belongs to.
    pub fingerprint: u64,
    /// Simulated time when the snapshot was taken.
    pub time: f64,
}

impl SnapshotHeader {
    pub fn new(fingerprint: u64, time: f64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            fingerprint,
            time,
        }
    }

    /// Check magic and version.
    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateSnapshot {
    header: SnapshotHeader,
    settings: Settings,
    state: SimulationState,
}

/// Encode a snapshot of `state` taken on `net`.
pub(crate) fn encode_snapshot(
    net: &Net,
    settings: &Settings,
    state: &SimulationState,
) -> Result<Vec<u8>, SerializeError> {
    let snapshot = StateSnapshot {
        header: SnapshotHeader::new(net.fingerprint(), state.time),
        settings: settings.clone(),
        state: state.clone(),
    };
    bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
}

/// Check a decoded run state against the net it is restored onto: every
/// marking finite and within `[0, capacity]`, and one transition state per
/// transition, of the matching kind.
fn validate_state(net: &Net, state: &SimulationState) -> Result<(), DeserializeError> {
    let invalid = |detail: String| Err(DeserializeError::InvalidState(detail));

    if !(state.time.is_finite() && state.time >= 0.0) {
        return invalid(format!("time {}", state.time));
    }
    for (id, place) in net.places() {
        let value = state.marking.get(id);
        let capacity = place.capacity.unwrap_or(f64::INFINITY);
        if !value.is_finite() || value < 0.0 || value > capacity + MARKING_EPSILON {
            return invalid(format!(
                "place '{}' has marking {value} outside [0, {capacity}]",
                place.name
            ));
        }
    }
    if state.transitions.len() != net.transition_count() {
        return invalid(format!(
            "{} transition states for {} transitions",
            state.transitions.len(),
            net.transition_count()
        ));
    }
    for (id, transition) in net.transitions() {
        let Some(ts) = state.transitions.get(id) else {
            return invalid(format!("no state for transition '{}'", transition.name));
        };
        let expected = transition.kind.initial_state();
        if std::mem::discriminant(&ts.runtime) != std::mem::discriminant(&expected) {
            return invalid(format!(
                "transition '{}' has state of the wrong kind",
                transition.name
            ));
        }
    }
    Ok(())
}

/// Decode only as far as needed to inspect the header.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    // bitcode has no partial decoding; the whole snapshot is read.
    let snapshot: StateSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Simulation methods
// ---------------------------------------------------------------------------

impl Simulation {
    /// Encode the settings and run state.
    pub fn save_state(&self) -> Result<Vec<u8>, SerializeError> {
        encode_snapshot(&self.net, &self.settings, &self.state)
    }

    /// Replace settings and run state with a snapshot taken from the same
    /// net. On any error the simulation is left unchanged.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<(), DeserializeError> {
        let snapshot: StateSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let expected = self.net.fingerprint();
        if snapshot.header.fingerprint != expected {
            return Err(DeserializeError::TopologyMismatch {
                expected,
                found: snapshot.header.fingerprint,
            });
        }
        snapshot
            .settings
            .validate()
            .map_err(|e| DeserializeError::InvalidSettings(e.to_string()))?;
        validate_state(&self.net, &snapshot.state)?;

        self.settings = snapshot.settings;
        self.state = snapshot.state;
        debug!(time = self.state.time, "state restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetBuilder;
    use crate::transition::{KindState, TransitionDef};

    fn simulation(weight: f64) -> Simulation {
        let mut b = NetBuilder::new();
        b.place("P", 20.0)
            .place("Q", 0.0)
            .transition(TransitionDef::stochastic("T", 3.0).with_max_burst(4))
            .ordinary("P", "T", weight)
            .ordinary("T", "Q", 1.0);
        Simulation::new(
            b.build().unwrap(),
            Settings {
                seed: 11,
                ..Settings::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn restored_run_continues_identically() {
        let mut a = simulation(1.0);
        for _ in 0..3 {
            a.step(0.5).unwrap();
        }
        let bytes = a.save_state().unwrap();

        let mut b = simulation(1.0);
        b.restore_state(&bytes).unwrap();
        assert_eq!(a.state_hash(), b.state_hash());

        for _ in 0..5 {
            a.step(0.5).unwrap();
            b.step(0.5).unwrap();
        }
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn header_reports_time_and_fingerprint() {
        let mut sim = simulation(1.0);
        sim.step(0.25).unwrap();
        let header = read_snapshot_header(&sim.save_state().unwrap()).unwrap();
        assert_eq!(header.time, 0.25);
        assert_eq!(header.fingerprint, sim.net().fingerprint());
    }

    #[test]
    fn different_topology_rejected() {
        let bytes = simulation(1.0).save_state().unwrap();
        let mut other = simulation(2.0);
        let before = other.state_hash();
        assert!(matches!(
            other.restore_state(&bytes),
            Err(DeserializeError::TopologyMismatch { .. })
        ));
        assert_eq!(other.state_hash(), before);
    }

    #[test]
    fn header_version_checks() {
        let mut h = SnapshotHeader::new(0, 0.0);
        assert!(h.validate().is_ok());
        h.version = FORMAT_VERSION + 1;
        assert!(matches!(h.validate(), Err(DeserializeError::FutureVersion(_))));
        h.version = 0;
        assert!(matches!(h.validate(), Err(DeserializeError::UnsupportedVersion(0))));
        h.version = FORMAT_VERSION;
        h.magic = 0xDEAD_BEEF;
        assert!(matches!(h.validate(), Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))));
    }

    #[test]
    fn out_of_range_marking_rejected() {
        let mut sim = simulation(1.0);
        let p = sim.net().place_id("P").unwrap();
        for value in [-7.0, f64::NAN, f64::INFINITY] {
            let mut state = sim.state().clone();
            state.marking.set(p, value);
            let bytes = encode_snapshot(sim.net(), sim.settings(), &state).unwrap();
            assert!(matches!(
                sim.restore_state(&bytes),
                Err(DeserializeError::InvalidState(_))
            ));
            assert_eq!(sim.state().marking.get(p), 20.0);
        }
    }

    #[test]
    fn mismatched_kind_state_rejected() {
        let mut sim = simulation(1.0);
        let t = sim.net().transition_id("T").unwrap();
        let mut state = sim.state().clone();
        state.transitions[t].runtime = KindState::Timed;
        let bytes = encode_snapshot(sim.net(), sim.settings(), &state).unwrap();
        assert!(matches!(
            sim.restore_state(&bytes),
            Err(DeserializeError::InvalidState(_))
        ));
    }

    #[test]
    fn changed_rate_or_window_rejected() {
        let bytes = simulation(1.0).save_state().unwrap();

        let mut b = NetBuilder::new();
        b.place("P", 20.0)
            .place("Q", 0.0)
            .transition(TransitionDef::stochastic("T", 9.0).with_max_burst(4))
            .ordinary("P", "T", 1.0)
            .ordinary("T", "Q", 1.0);
        let mut faster = Simulation::with_defaults(b.build().unwrap());
        assert!(matches!(
            faster.restore_state(&bytes),
            Err(DeserializeError::TopologyMismatch { .. })
        ));

        let timed = |latest: f64| {
            let mut b = NetBuilder::new();
            b.place("P", 1.0)
                .transition(TransitionDef::timed("T", 0.0, latest))
                .ordinary("P", "T", 1.0);
            Simulation::with_defaults(b.build().unwrap())
        };
        let bytes = timed(1.0).save_state().unwrap();
        assert!(matches!(
            timed(2.0).restore_state(&bytes),
            Err(DeserializeError::TopologyMismatch { .. })
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let mut sim = simulation(1.0);
        assert!(matches!(
            sim.restore_state(&[1, 2, 3]),
            Err(DeserializeError::Decode(_))
        ));
    }
}
