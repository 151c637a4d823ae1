//! File loading and saving for petrisim nets and settings.
//!
//! Net records and settings can be stored as RON, TOML or JSON; the format
//! is picked from the file extension. A scenario directory holds a `net`
//! file and an optional `settings` file.

pub mod loader;

pub use loader::{
    DataLoadError, EncodeError, Format, Scenario, load_net, load_scenario, load_settings,
    load_simulation, save_net, save_settings,
};
