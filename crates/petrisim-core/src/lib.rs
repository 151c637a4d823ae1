//! Petrisim Core -- a hybrid discrete/continuous Petri-net execution engine.
//!
//! Places hold non-negative real markings. Transitions are one of four kinds
//! (immediate, timed, stochastic, continuous) and connect to places through
//! ordinary, test (catalyst) and inhibitor arcs. The engine advances the
//! whole net through one deterministic stepping loop given a seed.
//!
//! # Step Pipeline
//!
//! Each call to [`engine::Simulation::step`] advances time by `dt`:
//!
//! 1. **Enablement** -- Recompute enablement and stamp enablement times.
//! 2. **Immediate** -- Fire immediate transitions exhaustively, highest
//!    priority first, bounded by an iteration ceiling.
//! 3. **Scheduled** -- Fire timed and stochastic transitions due in `[t, t + dt)`.
//! 4. **Continuous** -- Integrate continuous flows over `dt`.
//! 5. **Clock** -- Advance `t` by `dt`.
//! 6. **Enablement** -- Recompute for the next step.
//!
//! # Building a Net
//!
//! ```rust,ignore
//! let mut b = NetBuilder::new();
//! b.place("S", 10.0)
//!     .place("P", 0.0)
//!     .transition(
//!         TransitionDef::continuous("convert", "Vmax*S/(Km+S)")
//!             .with_parameter("Vmax", 10.0)
//!             .with_parameter("Km", 5.0),
//!     )
//!     .ordinary("S", "convert", 1.0)
//!     .ordinary("convert", "P", 1.0);
//! let mut sim = Simulation::new(b.build()?, Settings::default())?;
//! sim.step(0.1)?;
//! ```
//!
//! # Key Types
//!
//! - [`net::NetBuilder`] / [`net::Net`] -- Validated, immutable topology.
//! - [`engine::Simulation`] -- Controller: stepping, reset, pause, settings.
//! - [`settings::Settings`] -- Run configuration, changed via
//!   [`settings::SettingsTransaction`].
//! - [`expr`] -- Safe expression language for guards and rate functions.
//! - [`record::NetRecord`] -- Persisted record shape.
//! - [`serialize`] -- Versioned binary snapshots via bitcode.

pub mod behavior;
pub mod conflict;
pub mod enablement;
pub mod engine;
pub mod expr;
pub mod id;
pub mod marking;
pub mod net;
pub mod query;
pub mod record;
pub mod rng;
pub mod serialize;
pub mod settings;
pub mod sim;
pub mod transition;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
