//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::engine::Simulation;
use crate::net::{Net, NetBuilder};
use crate::settings::{Settings, TimeStepMode};
use crate::transition::TransitionDef;

// ===========================================================================
// Settings
// ===========================================================================

/// Default settings with a fixed seed.
pub fn seeded(seed: u64) -> Settings {
    Settings {
        seed,
        ..Settings::default()
    }
}

/// Settings with a manual step and the given seed.
pub fn manual(dt: f64, seed: u64) -> Settings {
    Settings {
        seed,
        time_step: TimeStepMode::Manual { dt },
        ..Settings::default()
    }
}

pub fn simulation(net: Net, settings: Settings) -> Simulation {
    Simulation::new(net, settings).expect("test settings are valid")
}

pub fn marking(sim: &Simulation, place: &str) -> f64 {
    sim.marking_by_name(place)
        .unwrap_or_else(|| panic!("no place named '{place}'"))
}

// ===========================================================================
// Nets
// ===========================================================================

/// `P1 = 10`, catalyst `P2 = 1`, immediate `T1` (priority 5) consuming 2
/// from `P1` and producing 1 into `P3`.
pub fn catalyst_net() -> Net {
    let mut b = NetBuilder::new();
    b.place("P1", 10.0)
        .place("P2", 1.0)
        .place("P3", 0.0)
        .transition(TransitionDef::immediate("T1", 5))
        .ordinary("P1", "T1", 2.0)
        .test_arc("P2", "T1", 1.0)
        .ordinary("T1", "P3", 1.0);
    b.build().expect("catalyst net is valid")
}

/// Substrate `S` converted to product `P` by a continuous Michaelis-Menten
/// transition with `Vmax = 10`, `Km = 5`.
pub fn michaelis_menten_net(substrate: f64) -> Net {
    let mut b = NetBuilder::new();
    b.place("S", substrate)
        .place("P", 0.0)
        .transition(
            TransitionDef::continuous("convert", "Vmax*S/(Km+S)")
                .with_parameter("Vmax", 10.0)
                .with_parameter("Km", 5.0),
        )
        .ordinary("S", "convert", 1.0)
        .ordinary("convert", "P", 1.0);
    b.build().expect("michaelis-menten net is valid")
}

/// A ring of `n` places joined by `n` transitions of weight `w` in and out.
/// Place 0 starts with `tokens`; every other place is empty.
pub fn cycle_builder(n: usize, tokens: f64, w: f64, kind: impl Fn(&str) -> TransitionDef) -> NetBuilder {
    let mut b = NetBuilder::new();
    for i in 0..n {
        b.place(&format!("p{i}"), if i == 0 { tokens } else { 0.0 });
    }
    for i in 0..n {
        let t = format!("t{i}");
        b.transition(kind(&t))
            .ordinary(&format!("p{i}"), &t, w)
            .ordinary(&t, &format!("p{}", (i + 1) % n), w);
    }
    b
}

/// Ring of stochastic transitions.
pub fn stochastic_cycle_net(n: usize, tokens: f64, rate: f64) -> Net {
    cycle_builder(n, tokens, 1.0, |name| {
        TransitionDef::stochastic(name, rate).with_max_burst(8)
    })
    .build()
    .expect("cycle net is valid")
}

/// `n` independent substrate -> product chains, each driven by a continuous
/// mass-action transition and a competing stochastic drain.
pub fn mixed_net(n: usize) -> Net {
    let mut b = NetBuilder::new();
    for i in 0..n {
        let s = format!("s{i}");
        let p = format!("p{i}");
        let flow = format!("flow{i}");
        let drain = format!("drain{i}");
        b.place(&s, 100.0)
            .place(&p, 0.0)
            .transition(TransitionDef::continuous(&flow, &format!("k*{s}")).with_parameter("k", 0.2))
            .transition(TransitionDef::stochastic(&drain, 1.0))
            .ordinary(&s, &flow, 1.0)
            .ordinary(&flow, &p, 1.0)
            .ordinary(&p, &drain, 1.0);
    }
    b.build().expect("mixed net is valid")
}

/// Sum of markings over every place.
pub fn total_marking(sim: &Simulation) -> f64 {
    sim.state().marking.total()
}

// ===========================================================================
// Snapshots
// ===========================================================================

/// A snapshot of `sim` with `place` forced to `value`, bypassing every check.
pub fn snapshot_with_marking(sim: &Simulation, place: &str, value: f64) -> Vec<u8> {
    let id = sim
        .net()
        .place_id(place)
        .unwrap_or_else(|| panic!("no place named '{place}'"));
    let mut state = sim.state().clone();
    state.marking.set(id, value);
    crate::serialize::encode_snapshot(sim.net(), sim.settings(), &state)
        .expect("snapshot encodes")
}
