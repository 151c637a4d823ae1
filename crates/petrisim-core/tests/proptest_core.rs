//! Property-based tests for the petrisim core engine.
//!
//! Uses proptest to generate random nets and step sequences, then checks
//! the structural invariants hold.

use petrisim_core::engine::Simulation;
use petrisim_core::net::{Net, NetBuilder, NetError, StructuralError};
use petrisim_core::settings::Settings;
use petrisim_core::test_utils::*;
use petrisim_core::transition::TransitionDef;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn transition_def(kind: u8, name: &str) -> TransitionDef {
    match kind % 3 {
        0 => TransitionDef::immediate(name, (kind / 3) as i32),
        1 => TransitionDef::timed(name, 0.0, 0.5),
        _ => TransitionDef::stochastic(name, 2.0).with_max_burst(3),
    }
}

#[derive(Debug, Clone)]
struct NetSpec {
    markings: Vec<u8>,
    kinds: Vec<u8>,
    /// (place, transition, weight, place->transition?)
    arcs: Vec<(usize, usize, u8, bool)>,
}

fn arb_net_spec() -> impl Strategy<Value = NetSpec> {
    (1..6usize, 1..6usize).prop_flat_map(|(places, transitions)| {
        (
            proptest::collection::vec(0..10u8, places),
            proptest::collection::vec(any::<u8>(), transitions),
            proptest::collection::vec(
                (0..places, 0..transitions, 1..4u8, any::<bool>()),
                0..12,
            ),
        )
            .prop_map(|(markings, kinds, arcs)| NetSpec {
                markings,
                kinds,
                arcs,
            })
    })
}

fn build(spec: &NetSpec) -> Net {
    let mut b = NetBuilder::new();
    for (i, m) in spec.markings.iter().enumerate() {
        b.place(&format!("p{i}"), *m as f64);
    }
    for (i, k) in spec.kinds.iter().enumerate() {
        b.transition(transition_def(*k, &format!("t{i}")));
    }
    for &(p, t, w, input) in &spec.arcs {
        let (p, t) = (format!("p{p}"), format!("t{t}"));
        if input {
            b.ordinary(&p, &t, w as f64);
        } else {
            b.ordinary(&t, &p, w as f64);
        }
    }
    b.build().unwrap()
}

fn run(sim: &mut Simulation, steps: usize, dt: f64) {
    for _ in 0..steps {
        sim.step(dt).unwrap();
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Test-arc places are bit-identical before and after any firings.
    #[test]
    fn catalyst_marking_never_changes(
        catalyst in 1.0f64..50.0,
        substrate in 0u32..40,
        kind in any::<u8>(),
        seed in any::<u64>(),
        steps in 1usize..30,
    ) {
        let mut b = NetBuilder::new();
        b.place("S", substrate as f64)
            .place("E", catalyst)
            .place("P", 0.0)
            .transition(transition_def(kind, "T"))
            .transition(TransitionDef::continuous("C", "0.1 * E"))
            .ordinary("S", "T", 1.0)
            .ordinary("T", "P", 1.0)
            .test_arc("E", "T", 1.0)
            .test_arc("E", "C", 1.0)
            .ordinary("C", "P", 1.0);
        let mut sim = simulation(b.build().unwrap(), seeded(seed));
        let before = marking(&sim, "E").to_bits();
        run(&mut sim, steps, 0.1);
        prop_assert_eq!(marking(&sim, "E").to_bits(), before);
    }

    /// A ring with matched weights conserves its total marking.
    #[test]
    fn cycle_conserves_tokens(
        n in 2usize..7,
        tokens in 0u32..30,
        w in 1u32..4,
        kind in any::<u8>(),
        seed in any::<u64>(),
    ) {
        let net = cycle_builder(n, tokens as f64, w as f64, |name| transition_def(kind, name))
            .build()
            .unwrap();
        let mut sim = simulation(net, seeded(seed));
        run(&mut sim, 25, 0.2);
        prop_assert_eq!(total_marking(&sim), tokens as f64);
    }

    /// Cascading immediate firings advance the clock by exactly `dt`.
    #[test]
    fn immediate_cascade_takes_zero_time(
        depth in 1usize..20,
        dt in 0.001f64..100.0,
    ) {
        let mut b = NetBuilder::new();
        b.place("q0", 1.0);
        for i in 0..depth {
            let t = format!("t{i}");
            b.place(&format!("q{}", i + 1), 0.0)
                .transition(TransitionDef::immediate(&t, 0))
                .ordinary(&format!("q{i}"), &t, 1.0)
                .ordinary(&t, &format!("q{}", i + 1), 1.0);
        }
        let mut sim = simulation(b.build().unwrap(), Settings::default());
        let report = sim.step(dt).unwrap();
        prop_assert_eq!(report.firings.len(), depth);
        prop_assert_eq!(sim.time(), dt);
        prop_assert_eq!(marking(&sim, &format!("q{depth}")), 1.0);
    }

    /// Every reachable marking is non-negative.
    #[test]
    fn markings_never_negative(spec in arb_net_spec(), seed in any::<u64>()) {
        let mut sim = simulation(build(&spec), seeded(seed));
        for _ in 0..20 {
            sim.step(0.1).unwrap();
            for place in sim.snapshot_places() {
                prop_assert!(place.marking >= 0.0, "{} = {}", place.name, place.marking);
            }
        }
    }

    /// Same seed, same net: identical state after every step.
    #[test]
    fn deterministic_replay(spec in arb_net_spec(), seed in any::<u64>()) {
        let mut a = simulation(build(&spec), seeded(seed));
        let mut b = simulation(build(&spec), seeded(seed));
        for _ in 0..15 {
            a.step(0.1).unwrap();
            b.step(0.1).unwrap();
            prop_assert_eq!(a.state_hash(), b.state_hash());
        }
    }

    /// A transition-to-place inhibitor arc fails construction for every pair.
    #[test]
    fn inhibitor_from_transition_always_rejected(
        places in 1usize..5,
        transitions in 1usize..5,
        pick in (0usize..5, 0usize..5),
    ) {
        let mut b = NetBuilder::new();
        for i in 0..places {
            b.place(&format!("p{i}"), 1.0);
        }
        for i in 0..transitions {
            b.transition(TransitionDef::immediate(&format!("t{i}"), 0));
        }
        let (p, t) = (pick.0 % places, pick.1 % transitions);
        b.inhibitor(&format!("t{t}"), &format!("p{p}"), 1.0);
        let is_structural_direction_error = matches!(
            b.build(),
            Err(NetError::Structural(StructuralError::ReadArcFromTransition { .. }))
        );
        prop_assert!(is_structural_direction_error);
    }
}
