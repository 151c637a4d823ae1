//! End-to-end scenarios driving whole nets through the public API.

use petrisim_core::conflict::ConflictPolicy;
use petrisim_core::engine::{Simulation, StepError};
use petrisim_core::net::NetBuilder;
use petrisim_core::settings::{Settings, TimeStepMode};
use petrisim_core::sim::{ControllerState, Phase, StepWarning};
use petrisim_core::test_utils::*;
use petrisim_core::transition::TransitionDef;

// ===========================================================================
// Reference scenarios
// ===========================================================================

#[test]
fn catalyst_scenario_fires_exhaustively_in_one_step() {
    for policy in [
        ConflictPolicy::Random,
        ConflictPolicy::Priority,
        ConflictPolicy::RoundRobin,
    ] {
        let settings = Settings {
            conflict_policy: policy,
            ..Settings::default()
        };
        let mut sim = simulation(catalyst_net(), settings);
        let report = sim.step(1.0).unwrap();

        assert_eq!(report.firings.len(), 5);
        assert!(report.firings.iter().all(|f| f.phase == Phase::Immediate));
        assert_eq!(marking(&sim, "P1"), 0.0);
        assert_eq!(marking(&sim, "P2"), 1.0);
        assert_eq!(marking(&sim, "P3"), 5.0);
        assert_eq!(sim.time(), 1.0);
    }
}

#[test]
fn michaelis_menten_single_euler_step() {
    let mut sim = simulation(michaelis_menten_net(10.0), Settings::default());
    let report = sim.step(0.1).unwrap();

    let expected_drop = 10.0 * 10.0 / (5.0 + 10.0) * 0.1;
    assert!((10.0 - marking(&sim, "S") - expected_drop).abs() < 1e-9);
    assert!((marking(&sim, "P") - expected_drop).abs() < 1e-9);
    assert_eq!(report.flows.len(), 1);
    assert!((report.flows[0].rate - 20.0 / 3.0).abs() < 1e-9);
}

#[test]
fn michaelis_menten_runs_to_end_conserving_mass() {
    let settings = Settings {
        duration: 5.0,
        ..Settings::default()
    };
    let mut sim = simulation(michaelis_menten_net(10.0), settings);
    let summary = sim.run_to_end().unwrap();

    assert_eq!(summary.final_time, 5.0);
    assert!(summary.steps >= 1000);
    assert!((marking(&sim, "S") + marking(&sim, "P") - 10.0).abs() < 1e-9);
    assert!(marking(&sim, "S") < 10.0);
    assert!(marking(&sim, "S") >= 0.0);
}

// ===========================================================================
// Mixed kinds
// ===========================================================================

#[test]
fn phases_run_in_fixed_order() {
    // An immediate feeds a timed which feeds a continuous sink.
    let mut b = NetBuilder::new();
    b.place("A", 1.0)
        .place("B", 0.0)
        .place("C", 0.0)
        .place("D", 0.0)
        .transition(TransitionDef::immediate("imm", 0))
        .transition(TransitionDef::timed("tim", 0.0, 5.0))
        .transition(TransitionDef::continuous("cont", "C"))
        .ordinary("A", "imm", 1.0)
        .ordinary("imm", "B", 1.0)
        .ordinary("B", "tim", 1.0)
        .ordinary("tim", "C", 1.0)
        .ordinary("C", "cont", 1.0)
        .ordinary("cont", "D", 1.0);
    let mut sim = simulation(b.build().unwrap(), Settings::default());

    // One step carries the token through all three phases in order.
    let r1 = sim.step(0.1).unwrap();
    let phases: Vec<_> = r1.firings.iter().map(|f| f.phase).collect();
    assert_eq!(phases, vec![Phase::Immediate, Phase::Scheduled]);
    assert_eq!(r1.flows.len(), 1);
    assert_eq!(marking(&sim, "B"), 0.0);
    assert!((marking(&sim, "C") - 0.9).abs() < 1e-12);
    assert!((marking(&sim, "D") - 0.1).abs() < 1e-12);

    // C fell below the arc weight, so the continuous transition stops.
    let r2 = sim.step(0.1).unwrap();
    assert!(r2.firings.is_empty());
    assert!(r2.flows.is_empty());
    assert!((marking(&sim, "D") - 0.1).abs() < 1e-12);
}

#[test]
fn inhibitor_stops_production_at_threshold() {
    let mut b = NetBuilder::new();
    b.place("Out", 0.0)
        .transition(TransitionDef::immediate("make", 0))
        .ordinary("make", "Out", 1.0)
        .inhibitor("Out", "make", 3.0);
    let mut sim = simulation(b.build().unwrap(), Settings::default());
    let report = sim.step(1.0).unwrap();
    assert_eq!(report.firings.len(), 3);
    assert_eq!(marking(&sim, "Out"), 3.0);
    assert!(!report.hit_iteration_limit());
}

#[test]
fn capacity_bounds_discrete_production() {
    let mut b = NetBuilder::new();
    b.place("Src", 10.0)
        .bounded_place("Buf", 0.0, 4.0)
        .transition(TransitionDef::immediate("fill", 0))
        .ordinary("Src", "fill", 1.0)
        .ordinary("fill", "Buf", 1.0);
    let mut sim = simulation(b.build().unwrap(), Settings::default());
    sim.step(1.0).unwrap();
    assert_eq!(marking(&sim, "Buf"), 4.0);
    assert_eq!(marking(&sim, "Src"), 6.0);
}

#[test]
fn guard_over_time_gates_firing() {
    let mut b = NetBuilder::new();
    b.place("P", 1.0)
        .place("Q", 0.0)
        .transition(TransitionDef::immediate("late", 0).with_guard("t >= 2"))
        .ordinary("P", "late", 1.0)
        .ordinary("late", "Q", 1.0);
    let mut sim = simulation(b.build().unwrap(), manual(1.0, 0));
    sim.advance().unwrap();
    sim.advance().unwrap();
    assert_eq!(marking(&sim, "Q"), 0.0);
    sim.advance().unwrap();
    assert_eq!(marking(&sim, "Q"), 1.0);
}

#[test]
fn round_robin_alternates_between_competitors() {
    // `refill` puts one token into P per step; A and B compete for it.
    let mut b = NetBuilder::new();
    b.place("P", 1.0)
        .place("GotA", 0.0)
        .place("GotB", 0.0)
        .transition(TransitionDef::immediate("A", 0))
        .transition(TransitionDef::immediate("B", 0))
        .transition(TransitionDef::timed("refill", 0.0, f64::INFINITY))
        .ordinary("P", "A", 1.0)
        .ordinary("A", "GotA", 1.0)
        .ordinary("P", "B", 1.0)
        .ordinary("B", "GotB", 1.0)
        .ordinary("refill", "P", 1.0);
    let settings = Settings {
        conflict_policy: ConflictPolicy::RoundRobin,
        ..Settings::default()
    };
    let mut sim = simulation(b.build().unwrap(), settings);
    let a = sim.net().transition_id("A").unwrap();
    let mut winners = Vec::new();
    for _ in 0..6 {
        let report = sim.step(1.0).unwrap();
        let winner = report
            .firings
            .iter()
            .find(|f| f.phase == Phase::Immediate)
            .map(|f| f.transition)
            .unwrap();
        winners.push(if winner == a { 'A' } else { 'B' });
    }
    assert_eq!(winners, vec!['A', 'B', 'A', 'B', 'A', 'B']);
    assert_eq!(marking(&sim, "GotA"), 3.0);
    assert_eq!(marking(&sim, "GotB"), 3.0);
}

#[test]
fn stochastic_ring_conserves_tokens() {
    let mut sim = simulation(stochastic_cycle_net(5, 20.0, 4.0), seeded(99));
    let mut fired = 0;
    for _ in 0..200 {
        fired += sim.step(0.05).unwrap().firings.len();
    }
    assert!(fired > 0);
    assert!((total_marking(&sim) - 20.0).abs() < 1e-12);
}

#[test]
fn same_seed_same_trajectory_different_seed_diverges() {
    let run = |seed: u64| {
        let mut sim = simulation(mixed_net(4), seeded(seed));
        let mut hashes = Vec::new();
        for _ in 0..100 {
            sim.step(0.05).unwrap();
            hashes.push(sim.state_hash());
        }
        hashes
    };
    assert_eq!(run(5), run(5));
    assert_ne!(run(5), run(6));
}

// ===========================================================================
// Controller lifecycle
// ===========================================================================

#[test]
fn lifecycle_idle_running_started_idle() {
    let mut sim = simulation(catalyst_net(), Settings::default());
    assert_eq!(sim.controller_state(), ControllerState::Idle);
    assert!(sim.can_edit_structure());

    sim.step(0.5).unwrap();
    assert_eq!(sim.controller_state(), ControllerState::Running);
    assert!(!sim.can_edit_structure());

    sim.pause();
    assert_eq!(sim.controller_state(), ControllerState::Started);
    assert!(!sim.step(0.5).unwrap().advanced);
    assert_eq!(sim.time(), 0.5);

    sim.reset();
    assert_eq!(sim.controller_state(), ControllerState::Idle);
    assert_eq!(sim.time(), 0.0);
    assert_eq!(marking(&sim, "P1"), 10.0);
    assert_eq!(marking(&sim, "P3"), 0.0);
}

#[test]
fn reset_replays_identically() {
    let mut sim = simulation(mixed_net(3), seeded(17));
    let mut first = Vec::new();
    for _ in 0..50 {
        sim.step(0.1).unwrap();
        first.push(sim.state_hash());
    }
    sim.reset();
    let mut second = Vec::new();
    for _ in 0..50 {
        sim.step(0.1).unwrap();
        second.push(sim.state_hash());
    }
    assert_eq!(first, second);
}

#[test]
fn settings_commit_changes_policy_and_seed() {
    let mut sim = simulation(catalyst_net(), Settings::default());
    let mut tx = sim.begin_settings();
    tx.staged_mut().conflict_policy = ConflictPolicy::Priority;
    tx.staged_mut().seed = 1234;
    tx.staged_mut().time_step = TimeStepMode::Manual { dt: 0.2 };
    sim.commit_settings(tx).unwrap();
    assert_eq!(sim.settings().conflict_policy, ConflictPolicy::Priority);
    assert_eq!(sim.suggest_dt(), 0.2);
    assert_eq!(sim.state().rng, petrisim_core::rng::SimRng::new(1234));
}

#[test]
fn iteration_limit_warning_is_non_fatal() {
    let net = cycle_builder(2, 1.0, 1.0, |name| TransitionDef::immediate(name, 0))
        .build()
        .unwrap();
    let mut sim = simulation(net, Settings::default());
    let report = sim.step(0.25).unwrap();
    let warning = report
        .warnings
        .iter()
        .find_map(|w| match w {
            StepWarning::IterationLimit(w) => Some(w),
            _ => None,
        })
        .unwrap();
    assert_eq!(warning.limit, 1000);
    assert_eq!(report.firings.len(), 1000);
    assert_eq!(sim.time(), 0.25);
    assert!((total_marking(&sim) - 1.0).abs() < 1e-12);
}

#[test]
fn overshooting_continuous_step_is_reported_not_clamped() {
    let mut sim = simulation(michaelis_menten_net(1.0), Settings::default());
    let before = sim.state_hash();
    let err = sim.step(10.0).unwrap_err();
    assert!(matches!(err, StepError::NegativeMarking(ref e) if e.place == "S"));
    assert_eq!(sim.state_hash(), before);
    assert_eq!(marking(&sim, "S"), 1.0);
}

#[test]
fn simulation_rejects_invalid_settings() {
    let settings = Settings {
        duration: -1.0,
        ..Settings::default()
    };
    assert!(Simulation::new(catalyst_net(), settings).is_err());
}
