//! Enablement evaluation and timestamp bookkeeping.
//!
//! Rules are checked in a fixed order so the reported reason is stable:
//! ordinary inputs, test arcs, inhibitor arcs, output capacity, guard,
//! and finally the rate of continuous transitions.

use tracing::trace;

use crate::engine::StepError;
use crate::expr::ExpressionError;
use crate::id::{PlaceId, TransitionId};
use crate::marking::{Marking, MarkingScope};
use crate::net::{ArcKind, Net};
use crate::sim::SimulationState;
use crate::transition::{KindState, Transition, TransitionKind};

/// Why a transition cannot fire right now.
#[derive(Debug, Clone, PartialEq)]
pub enum DisabledReason {
    /// Ordinary input place holds less than the total arc weight.
    InsufficientTokens {
        place: PlaceId,
        required: f64,
        available: f64,
    },
    /// Test-arc place holds less than the arc weight.
    TestArcUnsatisfied {
        place: PlaceId,
        required: f64,
        available: f64,
    },
    /// Inhibitor place has reached the arc weight.
    Inhibited {
        place: PlaceId,
        threshold: f64,
        available: f64,
    },
    /// Firing would push an output place past its capacity.
    CapacityExceeded { place: PlaceId, capacity: f64 },
    GuardFalse,
    /// Continuous rate evaluated to zero or less.
    NonPositiveRate(f64),
}

/// Result of an enablement check.
#[derive(Debug, Clone, PartialEq)]
pub enum Enablement {
    Enabled,
    Disabled(DisabledReason),
}

impl Enablement {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Enablement::Enabled)
    }
}

/// Net marking change of one discrete firing, aggregated per place.
pub fn firing_deltas(net: &Net, id: TransitionId) -> Vec<(PlaceId, f64)> {
    let mut deltas: Vec<(PlaceId, f64)> = Vec::new();
    let mut add = |place: PlaceId, amount: f64| match deltas.iter_mut().find(|(p, _)| *p == place) {
        Some(slot) => slot.1 += amount,
        None => deltas.push((place, amount)),
    };
    for arc in net.input_arcs(id).filter(|a| a.moves_tokens()) {
        add(arc.place, -arc.weight);
    }
    for arc in net.output_arcs(id) {
        add(arc.place, arc.weight);
    }
    deltas
}

/// Evaluate a continuous transition's rate function under `marking`.
pub fn continuous_rate(
    net: &Net,
    transition: &Transition,
    marking: &Marking,
    time: f64,
) -> Result<Option<f64>, ExpressionError> {
    let TransitionKind::Continuous {
        rate_function,
        parameters,
        ..
    } = &transition.kind
    else {
        return Ok(None);
    };
    let scope = MarkingScope {
        net,
        marking,
        parameters: Some(parameters),
        time,
    };
    rate_function.eval_number(&scope).map(Some)
}

/// Check whether transition `id` may fire under `marking` at `time`.
pub fn check(
    net: &Net,
    id: TransitionId,
    marking: &Marking,
    time: f64,
) -> Result<Enablement, ExpressionError> {
    let Some(transition) = net.transition(id) else {
        return Ok(Enablement::Disabled(DisabledReason::GuardFalse));
    };

    // 1. Ordinary inputs, summed per place so parallel arcs are honored.
    let mut required: Vec<(PlaceId, f64)> = Vec::new();
    for arc in net.input_arcs(id).filter(|a| a.kind == ArcKind::Ordinary) {
        match required.iter_mut().find(|(p, _)| *p == arc.place) {
            Some(slot) => slot.1 += arc.weight,
            None => required.push((arc.place, arc.weight)),
        }
    }
    for &(place, need) in &required {
        let available = marking.get(place);
        if available < need {
            return Ok(Enablement::Disabled(DisabledReason::InsufficientTokens {
                place,
                required: need,
                available,
            }));
        }
    }

    // 2. Test arcs.
    for arc in net.input_arcs(id).filter(|a| a.kind == ArcKind::Test) {
        let available = marking.get(arc.place);
        if available < arc.weight {
            return Ok(Enablement::Disabled(DisabledReason::TestArcUnsatisfied {
                place: arc.place,
                required: arc.weight,
                available,
            }));
        }
    }

    // 3. Inhibitor arcs.
    for arc in net.input_arcs(id).filter(|a| a.kind == ArcKind::Inhibitor) {
        let available = marking.get(arc.place);
        if available >= arc.weight {
            return Ok(Enablement::Disabled(DisabledReason::Inhibited {
                place: arc.place,
                threshold: arc.weight,
                available,
            }));
        }
    }

    // 4. Output capacity.
    let is_continuous = matches!(transition.kind, TransitionKind::Continuous { .. });
    if is_continuous {
        for arc in net.output_arcs(id) {
            if let Some(capacity) = net.place(arc.place).and_then(|p| p.capacity) {
                if marking.get(arc.place) >= capacity {
                    return Ok(Enablement::Disabled(DisabledReason::CapacityExceeded {
                        place: arc.place,
                        capacity,
                    }));
                }
            }
        }
    } else {
        for (place, delta) in firing_deltas(net, id) {
            if delta <= 0.0 {
                continue;
            }
            if let Some(capacity) = net.place(place).and_then(|p| p.capacity) {
                if marking.get(place) + delta > capacity {
                    return Ok(Enablement::Disabled(DisabledReason::CapacityExceeded {
                        place,
                        capacity,
                    }));
                }
            }
        }
    }

    // 5. Guard.
    if let Some(guard) = &transition.guard {
        let scope = MarkingScope {
            net,
            marking,
            parameters: transition.kind.parameters(),
            time,
        };
        if !guard.eval_bool(&scope)? {
            return Ok(Enablement::Disabled(DisabledReason::GuardFalse));
        }
    }

    // 6. Continuous rate.
    if let Some(rate) = continuous_rate(net, transition, marking, time)? {
        if rate <= 0.0 {
            return Ok(Enablement::Disabled(DisabledReason::NonPositiveRate(rate)));
        }
    }

    Ok(Enablement::Enabled)
}

/// Recompute enablement for every transition at the state's current time.
///
/// Newly enabled transitions are stamped with the current time (stochastic
/// ones also draw their first delay); newly disabled ones have their stamp
/// and pending delay cleared.
pub fn refresh(net: &Net, state: &mut SimulationState) -> Result<(), StepError> {
    let time = state.time;
    refresh_at(net, state, time)
}

/// Like [`refresh`], but stamps newly enabled transitions with `time`.
///
/// Used after a firing inside `[t, t + dt)` so that whatever it enabled is
/// clocked from the firing instant rather than from the start of the step.
pub fn refresh_at(net: &Net, state: &mut SimulationState, time: f64) -> Result<(), StepError> {
    for (id, transition) in net.transitions() {
        let enablement = check(net, id, &state.marking, time)
            .map_err(|e| StepError::expression(transition, e))?;
        let Some(ts) = state.transitions.get_mut(id) else {
            continue;
        };

        if let KindState::Continuous { last_rate } = &mut ts.runtime {
            *last_rate = match &enablement {
                Enablement::Disabled(DisabledReason::NonPositiveRate(r)) => Some(*r),
                Enablement::Enabled => continuous_rate(net, transition, &state.marking, time)
                    .map_err(|e| StepError::expression(transition, e))?,
                Enablement::Disabled(_) => None,
            };
        }

        match (enablement.is_enabled(), ts.enabled_since) {
            (true, None) => {
                ts.enabled_since = Some(time);
                if let (
                    TransitionKind::Stochastic { rate, .. },
                    KindState::Stochastic { scheduled_at },
                ) = (&transition.kind, &mut ts.runtime)
                {
                    *scheduled_at = Some(time + state.rng.exponential(*rate));
                }
                trace!(transition = %transition.name, time, "enabled");
            }
            (false, Some(_)) => {
                ts.enabled_since = None;
                if let KindState::Stochastic { scheduled_at } = &mut ts.runtime {
                    *scheduled_at = None;
                }
                trace!(transition = %transition.name, time, "disabled");
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetBuilder;
    use crate::transition::TransitionDef;

    fn check_named(net: &Net, marking: &Marking, name: &str) -> Enablement {
        check(net, net.transition_id(name).unwrap(), marking, 0.0).unwrap()
    }

    #[test]
    fn ordinary_input_threshold() {
        let mut b = NetBuilder::new();
        b.place("P", 1.0)
            .transition(TransitionDef::immediate("T", 0))
            .ordinary("P", "T", 2.0);
        let net = b.build().unwrap();
        let mut m = net.initial_marking();
        assert!(matches!(
            check_named(&net, &m, "T"),
            Enablement::Disabled(DisabledReason::InsufficientTokens { .. })
        ));
        m.set(net.place_id("P").unwrap(), 2.0);
        assert!(check_named(&net, &m, "T").is_enabled());
    }

    #[test]
    fn parallel_input_arcs_sum() {
        let mut b = NetBuilder::new();
        b.place("P", 3.0)
            .transition(TransitionDef::immediate("T", 0))
            .ordinary("P", "T", 2.0)
            .ordinary("P", "T", 2.0);
        let net = b.build().unwrap();
        assert!(!check_named(&net, &net.initial_marking(), "T").is_enabled());
    }

    #[test]
    fn test_arc_gates_without_consuming() {
        let mut b = NetBuilder::new();
        b.place("C", 0.0)
            .transition(TransitionDef::immediate("T", 0))
            .test_arc("C", "T", 1.0);
        let net = b.build().unwrap();
        let mut m = net.initial_marking();
        assert!(matches!(
            check_named(&net, &m, "T"),
            Enablement::Disabled(DisabledReason::TestArcUnsatisfied { .. })
        ));
        m.set(net.place_id("C").unwrap(), 1.0);
        assert!(check_named(&net, &m, "T").is_enabled());
        assert!(firing_deltas(&net, net.transition_id("T").unwrap()).is_empty());
    }

    #[test]
    fn inhibitor_enables_only_below_weight() {
        let mut b = NetBuilder::new();
        b.place("I", 0.0)
            .transition(TransitionDef::immediate("T", 0))
            .inhibitor("I", "T", 2.0);
        let net = b.build().unwrap();
        let i = net.place_id("I").unwrap();
        let mut m = net.initial_marking();
        assert!(check_named(&net, &m, "T").is_enabled());
        m.set(i, 1.9);
        assert!(check_named(&net, &m, "T").is_enabled());
        m.set(i, 2.0);
        assert!(matches!(
            check_named(&net, &m, "T"),
            Enablement::Disabled(DisabledReason::Inhibited { .. })
        ));
    }

    #[test]
    fn output_capacity_blocks_discrete_firing() {
        let mut b = NetBuilder::new();
        b.place("P", 5.0)
            .bounded_place("Q", 4.0, 5.0)
            .transition(TransitionDef::immediate("T", 0))
            .ordinary("P", "T", 1.0)
            .ordinary("T", "Q", 2.0);
        let net = b.build().unwrap();
        assert!(matches!(
            check_named(&net, &net.initial_marking(), "T"),
            Enablement::Disabled(DisabledReason::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn self_loop_does_not_count_against_capacity() {
        let mut b = NetBuilder::new();
        b.bounded_place("P", 5.0, 5.0)
            .transition(TransitionDef::immediate("T", 0))
            .ordinary("P", "T", 1.0)
            .ordinary("T", "P", 1.0);
        let net = b.build().unwrap();
        assert!(check_named(&net, &net.initial_marking(), "T").is_enabled());
    }

    #[test]
    fn guard_false_disables() {
        let mut b = NetBuilder::new();
        b.place("P", 3.0)
            .transition(TransitionDef::immediate("T", 0).with_guard("P > 5"));
        let net = b.build().unwrap();
        assert_eq!(
            check_named(&net, &net.initial_marking(), "T"),
            Enablement::Disabled(DisabledReason::GuardFalse)
        );
    }

    #[test]
    fn non_boolean_guard_is_an_error() {
        let mut b = NetBuilder::new();
        b.place("P", 3.0)
            .transition(TransitionDef::immediate("T", 0).with_guard("P + 1"));
        let net = b.build().unwrap();
        let t = net.transition_id("T").unwrap();
        assert!(matches!(
            check(&net, t, &net.initial_marking(), 0.0),
            Err(ExpressionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn continuous_zero_rate_is_disabled_not_error() {
        let mut b = NetBuilder::new();
        b.place("S", 0.0)
            .transition(TransitionDef::continuous("T", "k * S").with_parameter("k", 1.0));
        let net = b.build().unwrap();
        assert_eq!(
            check_named(&net, &net.initial_marking(), "T"),
            Enablement::Disabled(DisabledReason::NonPositiveRate(0.0))
        );
    }

    #[test]
    fn continuous_blocked_by_full_output() {
        let mut b = NetBuilder::new();
        b.bounded_place("Q", 1.0, 1.0)
            .transition(TransitionDef::continuous("T", "1"))
            .ordinary("T", "Q", 1.0);
        let net = b.build().unwrap();
        assert!(matches!(
            check_named(&net, &net.initial_marking(), "T"),
            Enablement::Disabled(DisabledReason::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn refresh_stamps_and_clears() {
        let mut b = NetBuilder::new();
        b.place("P", 1.0)
            .transition(TransitionDef::stochastic("T", 2.0))
            .ordinary("P", "T", 1.0);
        let net = b.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let mut state = SimulationState::initial(&net, 5);
        state.time = 1.5;
        refresh(&net, &mut state).unwrap();
        let ts = &state.transitions[t];
        assert_eq!(ts.enabled_since, Some(1.5));
        assert!(ts.scheduled_at().unwrap() >= 1.5);

        // A second refresh keeps the original stamp.
        state.time = 2.0;
        refresh(&net, &mut state).unwrap();
        assert_eq!(state.transitions[t].enabled_since, Some(1.5));

        state.marking.set(net.place_id("P").unwrap(), 0.0);
        refresh(&net, &mut state).unwrap();
        assert_eq!(state.transitions[t].enabled_since, None);
        assert_eq!(state.transitions[t].scheduled_at(), None);
    }

    #[test]
    fn refresh_at_stamps_with_given_instant() {
        let mut b = NetBuilder::new();
        b.place("P", 1.0)
            .transition(TransitionDef::timed("T", 0.5, 0.5))
            .ordinary("P", "T", 1.0);
        let net = b.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let mut state = SimulationState::initial(&net, 0);
        state.time = 1.0;
        refresh_at(&net, &mut state, 1.7).unwrap();
        assert_eq!(state.transitions[t].enabled_since, Some(1.7));
    }
}
