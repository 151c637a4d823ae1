//! Read-only views of simulation state.
//!
//! Snapshot types are owned copies, suitable for UIs, inspectors and the
//! persistence layer. Nothing here borrows into the live state.

use serde::{Deserialize, Serialize};

use crate::engine::Simulation;
use crate::id::{KindTag, PlaceId, TransitionId};

// ---------------------------------------------------------------------------
// Place snapshot
// ---------------------------------------------------------------------------

/// A place with its current marking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSnapshot {
    pub id: PlaceId,
    pub name: String,
    pub marking: f64,
    pub initial_marking: f64,
    /// `None` means unbounded.
    pub capacity: Option<f64>,
}

// ---------------------------------------------------------------------------
// Transition snapshot
// ---------------------------------------------------------------------------

/// A transition with its enablement bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSnapshot {
    pub id: TransitionId,
    pub name: String,
    pub kind: KindTag,
    pub enabled: bool,
    /// When the transition last became enabled.
    pub enabled_since: Option<f64>,
    /// Pending stochastic firing time.
    pub scheduled_at: Option<f64>,
    /// Continuous rate seen at the last enablement pass.
    pub last_rate: Option<f64>,
    /// Discrete firings since the last reset.
    pub firings: u64,
}

impl Simulation {
    pub fn snapshot_place(&self, id: PlaceId) -> Option<PlaceSnapshot> {
        let place = self.net.place(id)?;
        Some(PlaceSnapshot {
            id,
            name: place.name.clone(),
            marking: self.state.marking.get(id),
            initial_marking: place.initial_marking,
            capacity: place.capacity,
        })
    }

    /// Every place, in registration order.
    pub fn snapshot_places(&self) -> Vec<PlaceSnapshot> {
        self.net
            .places()
            .filter_map(|(id, _)| self.snapshot_place(id))
            .collect()
    }

    pub fn snapshot_transition(&self, id: TransitionId) -> Option<TransitionSnapshot> {
        let transition = self.net.transition(id)?;
        let state = self.state.transitions.get(id)?;
        Some(TransitionSnapshot {
            id,
            name: transition.name.clone(),
            kind: transition.kind.tag(),
            enabled: state.is_enabled(),
            enabled_since: state.enabled_since,
            scheduled_at: state.scheduled_at(),
            last_rate: state.last_rate(),
            firings: state.firings,
        })
    }

    /// Every transition, in registration order.
    pub fn snapshot_transitions(&self) -> Vec<TransitionSnapshot> {
        self.net
            .transitions()
            .filter_map(|(id, _)| self.snapshot_transition(id))
            .collect()
    }

    /// Look up a transition snapshot by name.
    pub fn transition_by_name(&self, name: &str) -> Option<TransitionSnapshot> {
        self.net
            .transition_id(name)
            .and_then(|id| self.snapshot_transition(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Simulation;
    use crate::id::KindTag;
    use crate::net::NetBuilder;
    use crate::transition::TransitionDef;

    fn simulation() -> Simulation {
        let mut b = NetBuilder::new();
        b.place("S", 4.0)
            .bounded_place("P", 0.0, 10.0)
            .transition(TransitionDef::continuous("flow", "k * S").with_parameter("k", 0.5))
            .ordinary("S", "flow", 1.0)
            .ordinary("flow", "P", 1.0);
        Simulation::with_defaults(b.build().unwrap())
    }

    #[test]
    fn place_snapshots_follow_registration_order() {
        let sim = simulation();
        let places = sim.snapshot_places();
        let names: Vec<_> = places.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["S", "P"]);
        assert_eq!(places[1].capacity, Some(10.0));
        assert_eq!(places[0].marking, places[0].initial_marking);
    }

    #[test]
    fn transition_snapshot_reports_rate_after_step() {
        let mut sim = simulation();
        let before = sim.transition_by_name("flow").unwrap();
        assert!(!before.enabled);
        assert_eq!(before.kind, KindTag::Continuous);

        sim.step(0.1).unwrap();
        let after = sim.transition_by_name("flow").unwrap();
        assert!(after.enabled);
        assert_eq!(after.enabled_since, Some(0.0));
        let rate = after.last_rate.unwrap();
        // Rate at the new marking S = 4 - 2 * 0.1.
        assert!((rate - 0.5 * 3.8).abs() < 1e-12);
    }

    #[test]
    fn unknown_names_are_none() {
        let sim = simulation();
        assert!(sim.transition_by_name("missing").is_none());
        assert!(sim.marking_by_name("missing").is_none());
    }
}
