//! Run configuration and the transaction used to change it.
//!
//! Settings are never edited in place. A [`SettingsTransaction`] holds a
//! staged copy; committing validates the copy as a whole and either swaps
//! it in or leaves the live settings untouched.

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictPolicy;

/// How the step size is chosen by `Simulation::advance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStepMode {
    /// Derived from the duration and bounded by continuous flow rates.
    Auto,
    /// Fixed step size.
    Manual { dt: f64 },
}

/// What happens to a timed transition whose window closed while it stayed enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowExpiryPolicy {
    /// Fire as soon as the expiry is detected.
    #[default]
    FireImmediately,
    /// Skip the firing and restart the enabling clock.
    Discard,
}

/// Simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Simulated time covered by `run_to_end`.
    pub duration: f64,
    pub time_step: TimeStepMode,
    /// Simulated seconds per wall-clock second, for external run loops.
    pub time_scale: f64,
    pub conflict_policy: ConflictPolicy,
    pub seed: u64,
    /// Ceiling on immediate firings within one step.
    pub max_immediate_iterations: u32,
    pub window_expiry: WindowExpiryPolicy,
    /// Auto mode: largest fraction of a place's marking one step may drain.
    pub auto_max_fraction: f64,
    /// Auto mode: smallest step size ever chosen.
    pub auto_min_dt: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            duration: 60.0,
            time_step: TimeStepMode::Auto,
            time_scale: 1.0,
            conflict_policy: ConflictPolicy::Random,
            seed: 0,
            max_immediate_iterations: 1000,
            window_expiry: WindowExpiryPolicy::FireImmediately,
            auto_max_fraction: 0.1,
            auto_min_dt: 1e-6,
        }
    }
}

/// Reasons a settings change is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsValidationError {
    #[error("duration must be positive and finite, got {0}")]
    Duration(f64),
    #[error("manual time step must be positive and finite, got {0}")]
    TimeStep(f64),
    #[error("time scale must be positive and finite, got {0}")]
    TimeScale(f64),
    #[error("immediate iteration limit must be at least 1")]
    IterationLimit,
    #[error("auto max fraction must be in (0, 1], got {0}")]
    AutoFraction(f64),
    #[error("auto minimum step must be positive and finite, got {0}")]
    AutoMinDt(f64),
}

fn positive_finite(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl Settings {
    /// Check every field; the first violation wins.
    pub fn validate(&self) -> Result<(), SettingsValidationError> {
        if !positive_finite(self.duration) {
            return Err(SettingsValidationError::Duration(self.duration));
        }
        if let TimeStepMode::Manual { dt } = self.time_step {
            if !positive_finite(dt) {
                return Err(SettingsValidationError::TimeStep(dt));
            }
        }
        if !positive_finite(self.time_scale) {
            return Err(SettingsValidationError::TimeScale(self.time_scale));
        }
        if self.max_immediate_iterations == 0 {
            return Err(SettingsValidationError::IterationLimit);
        }
        if !(self.auto_max_fraction > 0.0 && self.auto_max_fraction <= 1.0) {
            return Err(SettingsValidationError::AutoFraction(self.auto_max_fraction));
        }
        if !positive_finite(self.auto_min_dt) {
            return Err(SettingsValidationError::AutoMinDt(self.auto_min_dt));
        }
        Ok(())
    }

    /// Simulated time corresponding to `wall_seconds` of real time.
    pub fn sim_time_for(&self, wall_seconds: f64) -> f64 {
        wall_seconds * self.time_scale
    }
}

/// A staged copy of the settings awaiting commit or rollback.
#[derive(Debug, Clone)]
pub struct SettingsTransaction {
    original: Settings,
    staged: Settings,
}

impl SettingsTransaction {
    /// Stage a copy of `live`.
    pub fn begin(live: &Settings) -> Self {
        Self {
            original: live.clone(),
            staged: live.clone(),
        }
    }

    pub fn staged(&self) -> &Settings {
        &self.staged
    }

    pub fn staged_mut(&mut self) -> &mut Settings {
        &mut self.staged
    }

    /// Whether the staged copy differs from what was live at `begin`.
    pub fn is_dirty(&self) -> bool {
        self.staged != self.original
    }

    /// Validate the staged copy and, on success, write it into `live`.
    /// On failure `live` is not touched.
    pub fn commit(self, live: &mut Settings) -> Result<(), SettingsValidationError> {
        self.staged.validate()?;
        *live = self.staged;
        Ok(())
    }

    /// Discard the staged copy, returning the settings as they were at `begin`.
    pub fn rollback(self) -> Settings {
        self.original
    }
}
