//! Runs a Michaelis-Menten conversion with an inhibited stochastic
//! degradation and prints the markings at the end.
//!
//! ```sh
//! RUST_LOG=petrisim_core=debug cargo run -p petrisim-core --example michaelis_menten
//! ```

use petrisim_core::engine::Simulation;
use petrisim_core::net::NetBuilder;
use petrisim_core::settings::Settings;
use petrisim_core::transition::TransitionDef;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut b = NetBuilder::new();
    b.place("S", 100.0)
        .place("E", 1.0)
        .place("P", 0.0)
        .place("Waste", 0.0)
        .transition(
            TransitionDef::continuous("convert", "michaelis_menten(S, Vmax * E, Km)")
                .with_parameter("Vmax", 10.0)
                .with_parameter("Km", 5.0),
        )
        .transition(TransitionDef::stochastic("degrade", 0.5).with_max_burst(4))
        .ordinary("S", "convert", 1.0)
        .test_arc("E", "convert", 1.0)
        .ordinary("convert", "P", 1.0)
        .ordinary("P", "degrade", 1.0)
        .inhibitor("Waste", "degrade", 20.0)
        .ordinary("degrade", "Waste", 1.0);

    let settings = Settings {
        duration: 30.0,
        seed: 7,
        ..Settings::default()
    };
    let mut sim = Simulation::new(b.build()?, settings)?;
    let summary = sim.run_to_end()?;

    println!(
        "t = {:.2} after {} steps, {} discrete firings",
        summary.final_time, summary.steps, summary.firings
    );
    for place in sim.snapshot_places() {
        println!("  {:<6} {:>10.4}", place.name, place.marking);
    }
    Ok(())
}
