//! Per-kind firing behavior.
//!
//! Discrete kinds (immediate, timed, stochastic) share one atomic token
//! transfer, [`fire`]. They differ only in *when* they may fire, which is
//! what [`can_fire`] and [`window_status`] decide. Continuous transitions
//! never fire; [`integrate_continuous`] moves their flow over a whole step.

use tracing::trace;

use crate::enablement::{continuous_rate, firing_deltas};
use crate::engine::StepError;
use crate::id::{PlaceId, TransitionId};
use crate::marking::Marking;
use crate::net::{ArcKind, Net};
use crate::sim::{FlowRecord, SimulationState};
use crate::transition::{Transition, TransitionKind, TransitionState};

/// Magnitudes at or below this are treated as exactly zero after an update.
pub const MARKING_EPSILON: f64 = 1e-12;

/// A firing or integration would drive a place below zero.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("transition '{transition}' would leave place '{place}' at {value}")]
pub struct NegativeMarkingError {
    pub place: String,
    pub transition: String,
    pub value: f64,
}

fn snap(value: f64) -> f64 {
    if value.abs() <= MARKING_EPSILON { 0.0 } else { value }
}

fn place_name(net: &Net, place: PlaceId) -> String {
    net.place(place).map(|p| p.name.clone()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Where a timed transition stands relative to the step `[t, t + dt)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowStatus {
    /// `earliest` is not reached before the step ends.
    Pending,
    /// Some instant in the step lies inside the window.
    Due { at: f64 },
    /// `latest` passed before the step began.
    Expired { deadline: f64 },
}

/// Window check for a timed transition enabled since `since`.
pub fn window_status(earliest: f64, latest: f64, since: f64, time: f64, dt: f64) -> WindowStatus {
    let deadline = since + latest;
    if deadline < time {
        return WindowStatus::Expired { deadline };
    }
    let opens = since + earliest;
    if opens < time + dt {
        WindowStatus::Due {
            at: opens.max(time),
        }
    } else {
        WindowStatus::Pending
    }
}

/// Whether a transition is eligible for its phase during `[time, time + dt)`.
///
/// Expired timed windows count as eligible; what happens to them is decided
/// by the window expiry policy.
pub fn can_fire(kind: &TransitionKind, state: &TransitionState, time: f64, dt: f64) -> bool {
    let Some(since) = state.enabled_since else {
        return false;
    };
    match kind {
        TransitionKind::Immediate { .. } => true,
        TransitionKind::Timed {
            earliest, latest, ..
        } => !matches!(
            window_status(*earliest, *latest, since, time, dt),
            WindowStatus::Pending
        ),
        TransitionKind::Stochastic { .. } => state.scheduled_at().is_some_and(|at| at < time + dt),
        TransitionKind::Continuous { .. } => state.last_rate().is_some_and(|r| r > 0.0),
    }
}

// ---------------------------------------------------------------------------
// Discrete firing
// ---------------------------------------------------------------------------

/// Fire a discrete transition once.
///
/// All new markings are computed and checked first; nothing is written
/// unless every place stays within `[0, capacity]`.
pub fn fire(
    net: &Net,
    id: TransitionId,
    transition: &Transition,
    marking: &mut Marking,
) -> Result<(), StepError> {
    let mut planned = Vec::new();
    for (place, delta) in firing_deltas(net, id) {
        let value = snap(marking.get(place) + delta);
        if value < 0.0 {
            return Err(NegativeMarkingError {
                place: place_name(net, place),
                transition: transition.name.clone(),
                value,
            }
            .into());
        }
        if let Some(capacity) = net.place(place).and_then(|p| p.capacity) {
            if value > capacity {
                return Err(StepError::CapacityExceeded {
                    place: place_name(net, place),
                    capacity,
                    value,
                });
            }
        }
        planned.push((place, value));
    }
    for (place, value) in planned {
        marking.set(place, value);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Continuous integration
// ---------------------------------------------------------------------------

/// Integrate every enabled continuous transition over `dt` with one explicit
/// Euler step.
///
/// Rates are taken from the marking at entry and all flows are applied
/// together, so the order of transitions does not matter.
pub fn integrate_continuous(
    net: &Net,
    state: &mut SimulationState,
    dt: f64,
) -> Result<Vec<FlowRecord>, StepError> {
    let mut flows = Vec::new();
    // (place, accumulated change, a transition draining it)
    let mut changes: Vec<(PlaceId, f64, Option<TransitionId>)> = Vec::new();
    let mut accumulate = |place: PlaceId, amount: f64, drainer: Option<TransitionId>| {
        match changes.iter_mut().find(|(p, _, _)| *p == place) {
            Some(entry) => {
                entry.1 += amount;
                if entry.2.is_none() {
                    entry.2 = drainer;
                }
            }
            None => changes.push((place, amount, drainer)),
        }
    };

    for (id, transition) in net.transitions() {
        if !matches!(transition.kind, TransitionKind::Continuous { .. }) {
            continue;
        }
        if !state.transitions.get(id).is_some_and(|ts| ts.is_enabled()) {
            continue;
        }
        let rate = continuous_rate(net, transition, &state.marking, state.time)
            .map_err(|e| StepError::expression(transition, e))?
            .unwrap_or(0.0);
        if rate <= 0.0 {
            continue;
        }
        for arc in net.input_arcs(id).filter(|a| a.kind == ArcKind::Ordinary) {
            accumulate(arc.place, -rate * arc.weight * dt, Some(id));
        }
        for arc in net.output_arcs(id) {
            accumulate(arc.place, rate * arc.weight * dt, None);
        }
        trace!(transition = %transition.name, rate, dt, "continuous flow");
        flows.push(FlowRecord {
            transition: id,
            rate,
            dt,
        });
    }

    let mut planned = Vec::with_capacity(changes.len());
    for (place, delta, drainer) in changes {
        let value = snap(state.marking.get(place) + delta);
        if value < 0.0 {
            let transition = drainer
                .and_then(|t| net.transition(t))
                .map(|t| t.name.clone())
                .unwrap_or_default();
            return Err(NegativeMarkingError {
                place: place_name(net, place),
                transition,
                value,
            }
            .into());
        }
        if let Some(capacity) = net.place(place).and_then(|p| p.capacity) {
            if value > capacity + MARKING_EPSILON {
                return Err(StepError::CapacityExceeded {
                    place: place_name(net, place),
                    capacity,
                    value,
                });
            }
        }
        planned.push((place, value));
    }
    for (place, value) in planned {
        state.marking.set(place, value);
    }
    Ok(flows)
}
