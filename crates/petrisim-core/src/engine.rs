//! The simulation controller: owns the net, the settings and the run state,
//! and drives the stepping pipeline.
//!
//! # Step pipeline
//!
//! Each `step(dt)` runs, in order:
//! 1. **Enablement** -- recompute enablement and stamp timestamps at `t`
//! 2. **Immediate** -- fire immediate transitions until none is enabled or
//!    the iteration ceiling is hit
//! 3. **Scheduled** -- fire timed and stochastic transitions whose moment
//!    falls in `[t, t + dt)`, in conflict-policy order
//! 4. **Continuous** -- integrate every enabled continuous transition over `dt`
//! 5. **Clock** -- `t += dt`
//! 6. **Enablement** -- recompute again so the next step starts stamped
//!
//! The step runs on a staged copy of the state. An error discards the copy,
//! so a failed step leaves the simulation exactly as it was.

use tracing::{debug, info, trace, warn};

use crate::behavior::{self, NegativeMarkingError, WindowStatus, can_fire, window_status};
use crate::conflict::{Candidate, ConflictPolicy};
use crate::enablement::{self, Enablement, continuous_rate, refresh, refresh_at};
use crate::expr::ExpressionError;
use crate::id::{PlaceId, TransitionId};
use crate::net::{ArcKind, Net};
use crate::rng::SimRng;
use crate::settings::{
    Settings, SettingsTransaction, SettingsValidationError, TimeStepMode, WindowExpiryPolicy,
};
use crate::sim::{
    ControllerState, FiringRecord, IterationLimitWarning, Phase, RunSummary, SimulationState,
    StepReport, StepWarning,
};
use crate::transition::{KindState, Transition, TransitionKind};

/// Times closer than this are considered equal when checking for the end of a run.
const TIME_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Conditions that abort a step. The simulation state is left unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    NegativeMarking(#[from] NegativeMarkingError),

    #[error("place '{place}' would reach {value}, above its capacity {capacity}")]
    CapacityExceeded {
        place: String,
        capacity: f64,
        value: f64,
    },

    #[error("expression on transition '{transition}': {source}")]
    Expression {
        transition: String,
        source: ExpressionError,
    },

    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),
}

impl StepError {
    pub(crate) fn expression(transition: &Transition, source: ExpressionError) -> Self {
        StepError::Expression {
            transition: transition.name.clone(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// A net together with its settings and run state.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub(crate) net: Net,
    pub(crate) settings: Settings,
    pub(crate) state: SimulationState,
}

impl Simulation {
    /// Create a simulation at time zero. The settings are validated first.
    pub fn new(net: Net, settings: Settings) -> Result<Self, SettingsValidationError> {
        settings.validate()?;
        let state = SimulationState::initial(&net, settings.seed);
        Ok(Self {
            net,
            settings,
            state,
        })
    }

    pub fn with_defaults(net: Net) -> Self {
        let settings = Settings::default();
        let state = SimulationState::initial(&net, settings.seed);
        Self {
            net,
            settings,
            state,
        }
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    // -----------------------------------------------------------------------
    // Controller lifecycle
    // -----------------------------------------------------------------------

    pub fn controller_state(&self) -> ControllerState {
        self.state.controller
    }

    /// Structural edits are only allowed before the first step.
    pub fn can_edit_structure(&self) -> bool {
        self.state.controller == ControllerState::Idle
    }

    /// Pause a running simulation. Steps are skipped until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        if self.state.controller == ControllerState::Running {
            self.state.controller = ControllerState::Started;
        }
    }

    pub fn resume(&mut self) {
        if self.state.controller == ControllerState::Started {
            self.state.controller = ControllerState::Running;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.controller == ControllerState::Started
    }

    /// Restore initial markings, clear every timestamp and rate, rewind the
    /// RNG to the configured seed and return to `Idle` at `t = 0`.
    pub fn reset(&mut self) {
        self.state = SimulationState::initial(&self.net, self.settings.seed);
        debug!(seed = self.settings.seed, "simulation reset");
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Stage a copy of the live settings.
    pub fn begin_settings(&self) -> SettingsTransaction {
        SettingsTransaction::begin(&self.settings)
    }

    /// Validate and apply a staged settings change. On failure the live
    /// settings are untouched. A new seed takes effect immediately while
    /// `Idle`, otherwise at the next reset.
    pub fn commit_settings(
        &mut self,
        transaction: SettingsTransaction,
    ) -> Result<(), SettingsValidationError> {
        if let Err(e) = transaction.commit(&mut self.settings) {
            warn!(error = %e, "settings change rejected");
            return Err(e);
        }
        if self.state.controller == ControllerState::Idle {
            self.state.rng = SimRng::new(self.settings.seed);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advance the simulation by `dt`.
    ///
    /// While paused the call does nothing and returns a report with
    /// `advanced == false`.
    pub fn step(&mut self, dt: f64) -> Result<StepReport, StepError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(StepError::InvalidTimeStep(dt));
        }
        if self.is_paused() {
            return Ok(StepReport {
                time: self.state.time,
                ..StepReport::default()
            });
        }

        let mut staged = self.state.clone();
        let report = run_step(&self.net, &self.settings, &mut staged, dt)?;
        self.state = staged;

        debug!(
            time = report.time,
            dt,
            firings = report.firings.len(),
            flows = report.flows.len(),
            warnings = report.warnings.len(),
            "step complete"
        );
        Ok(report)
    }

    /// Step by [`suggest_dt`](Self::suggest_dt).
    pub fn advance(&mut self) -> Result<StepReport, StepError> {
        let dt = self.suggest_dt();
        self.step(dt)
    }

    /// Step size for the next call to [`advance`](Self::advance).
    ///
    /// Manual mode returns the configured step. Auto mode starts from
    /// `duration / 1000` and shrinks it so no place with a net continuous
    /// outflow loses more than `auto_max_fraction` of its marking.
    pub fn suggest_dt(&self) -> f64 {
        let settings = &self.settings;
        let base = match settings.time_step {
            TimeStepMode::Manual { dt } => return dt,
            TimeStepMode::Auto => settings.duration / 1000.0,
        };

        let mut dt = base;
        for (place, outflow) in self.continuous_outflows() {
            if outflow <= 0.0 {
                continue;
            }
            let marking = self.state.marking.get(place);
            if marking > 0.0 {
                dt = dt.min(settings.auto_max_fraction * marking / outflow);
            }
        }
        let dt = dt.max(settings.auto_min_dt);
        if dt < base {
            debug!(dt, base, "auto time step limited by continuous flow");
        }
        dt
    }

    /// Net outflow rate per place from continuous transitions enabled under
    /// the current marking. Expression errors are left for `step` to report.
    fn continuous_outflows(&self) -> Vec<(PlaceId, f64)> {
        let mut outflows: Vec<(PlaceId, f64)> = Vec::new();
        let mut add = |place: PlaceId, amount: f64| {
            match outflows.iter_mut().find(|(p, _)| *p == place) {
                Some(slot) => slot.1 += amount,
                None => outflows.push((place, amount)),
            }
        };
        let time = self.state.time;
        for (id, transition) in self.net.transitions() {
            if !matches!(transition.kind, TransitionKind::Continuous { .. }) {
                continue;
            }
            let enabled = enablement::check(&self.net, id, &self.state.marking, time)
                .is_ok_and(|e| e.is_enabled());
            if !enabled {
                continue;
            }
            let Ok(Some(rate)) = continuous_rate(&self.net, transition, &self.state.marking, time)
            else {
                continue;
            };
            for arc in self.net.input_arcs(id).filter(|a| a.kind == ArcKind::Ordinary) {
                add(arc.place, rate * arc.weight);
            }
            for arc in self.net.output_arcs(id) {
                add(arc.place, -rate * arc.weight);
            }
        }
        outflows
    }

    /// Step until the configured duration is reached. The last step is
    /// shortened so the run ends exactly on `duration`. Stops at the first
    /// error, or immediately if paused.
    pub fn run_to_end(&mut self) -> Result<RunSummary, StepError> {
        let duration = self.settings.duration;
        info!(duration, start = self.state.time, "run started");

        let mut summary = RunSummary::default();
        while self.state.time < duration - TIME_EPSILON && !self.is_paused() {
            let remaining = duration - self.state.time;
            let suggested = self.suggest_dt();
            let last = suggested >= remaining - TIME_EPSILON;
            let report = self.step(if last { remaining } else { suggested })?;
            if last {
                self.state.time = duration;
            }
            summary.steps += 1;
            summary.firings += report.firings.len() as u64;
            summary.warnings.extend(report.warnings);
        }
        summary.final_time = self.state.time;

        info!(
            steps = summary.steps,
            firings = summary.firings,
            warnings = summary.warnings.len(),
            final_time = summary.final_time,
            "run finished"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // State queries
    // -----------------------------------------------------------------------

    pub fn time(&self) -> f64 {
        self.state.time
    }

    /// Completed steps since the last reset.
    pub fn steps(&self) -> u64 {
        self.state.steps
    }

    pub fn marking(&self, place: PlaceId) -> f64 {
        self.state.marking.get(place)
    }

    pub fn marking_by_name(&self, name: &str) -> Option<f64> {
        self.net.place_id(name).map(|id| self.state.marking.get(id))
    }

    /// Whether the transition was enabled at the last enablement pass.
    pub fn is_enabled(&self, transition: TransitionId) -> bool {
        self.state
            .transitions
            .get(transition)
            .is_some_and(|ts| ts.is_enabled())
    }

    /// Evaluate enablement under the current marking, with the reason when disabled.
    pub fn enablement(&self, transition: TransitionId) -> Result<Enablement, ExpressionError> {
        enablement::check(&self.net, transition, &self.state.marking, self.state.time)
    }

    /// Deterministic hash of the run state, for replay comparison.
    pub fn state_hash(&self) -> u64 {
        self.state.hash(&self.net)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn run_step(
    net: &Net,
    settings: &Settings,
    state: &mut SimulationState,
    dt: f64,
) -> Result<StepReport, StepError> {
    let mut report = StepReport {
        dt,
        advanced: true,
        ..StepReport::default()
    };

    // Phase 1: enablement at t.
    refresh(net, state)?;

    // Phase 2: immediate transitions.
    phase_immediate(net, settings, state, dt, &mut report)?;

    // Phase 3: timed and stochastic transitions.
    phase_scheduled(net, settings, state, dt, &mut report)?;

    // Phase 4: continuous integration.
    report.flows = behavior::integrate_continuous(net, state, dt)?;

    // Phase 5: clock.
    state.time += dt;
    state.steps += 1;
    state.controller = ControllerState::Running;

    // Phase 6: enablement at t + dt.
    refresh(net, state)?;

    report.time = state.time;
    Ok(report)
}

fn candidates(
    net: &Net,
    state: &SimulationState,
    dt: f64,
    include: impl Fn(&TransitionKind) -> bool,
) -> Vec<Candidate> {
    net.transitions()
        .enumerate()
        .filter(|(_, (id, t))| {
            include(&t.kind)
                && state
                    .transitions
                    .get(*id)
                    .is_some_and(|ts| can_fire(&t.kind, ts, state.time, dt))
        })
        .map(|(index, (id, t))| Candidate {
            id,
            priority: t.kind.priority(),
            index,
        })
        .collect()
}

fn phase_immediate(
    net: &Net,
    settings: &Settings,
    state: &mut SimulationState,
    dt: f64,
    report: &mut StepReport,
) -> Result<(), StepError> {
    let n = net.transition_count();
    let limit = settings.max_immediate_iterations;
    let mut fired: u32 = 0;
    loop {
        let mut eligible = candidates(net, state, dt, |k| {
            matches!(k, TransitionKind::Immediate { .. })
        });
        if eligible.is_empty() {
            return Ok(());
        }
        if fired >= limit {
            let warning = IterationLimitWarning {
                limit,
                time: state.time,
                still_enabled: eligible.iter().map(|c| c.id).collect(),
            };
            warn!(%warning, "possible immediate-firing cycle");
            report.warnings.push(StepWarning::IterationLimit(warning));
            return Ok(());
        }
        let Some(winner) =
            state
                .resolver
                .pick_immediate(settings.conflict_policy, &mut eligible, n, &mut state.rng)
        else {
            return Ok(());
        };
        // Only top-priority candidates remain after the pick.
        let contested = eligible.len() > 1;
        let Some(transition) = net.transition(winner.id) else {
            return Ok(());
        };
        let at = state.time;
        commit_firing(net, state, winner.id, transition, Phase::Immediate, at, report)?;
        if contested {
            state.resolver.record_firing(&winner, n);
        }
        fired += 1;
    }
}

fn phase_scheduled(
    net: &Net,
    settings: &Settings,
    state: &mut SimulationState,
    dt: f64,
    report: &mut StepReport,
) -> Result<(), StepError> {
    let n = net.transition_count();
    let t = state.time;
    let mut eligible = candidates(net, state, dt, |k| {
        matches!(
            k,
            TransitionKind::Timed { .. } | TransitionKind::Stochastic { .. }
        )
    });
    let contested = eligible.len() > 1;
    if contested {
        state
            .resolver
            .order(settings.conflict_policy, &mut eligible, n, &mut state.rng);
    }

    for candidate in eligible {
        let Some(transition) = net.transition(candidate.id) else {
            continue;
        };
        let fired = match &transition.kind {
            TransitionKind::Timed {
                earliest, latest, ..
            } => fire_timed(
                net, settings, state, candidate.id, transition, *earliest, *latest, dt, report,
            )?,
            TransitionKind::Stochastic { max_burst, .. } => {
                fire_stochastic(net, state, candidate.id, transition, *max_burst, dt, report)?
            }
            TransitionKind::Immediate { .. } | TransitionKind::Continuous { .. } => false,
        };
        if fired && contested && settings.conflict_policy == ConflictPolicy::RoundRobin {
            state.resolver.record_firing(&candidate, n);
        }
    }
    trace!(time = t, "scheduled phase done");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn fire_timed(
    net: &Net,
    settings: &Settings,
    state: &mut SimulationState,
    id: TransitionId,
    transition: &Transition,
    earliest: f64,
    latest: f64,
    dt: f64,
    report: &mut StepReport,
) -> Result<bool, StepError> {
    let t = state.time;
    // Re-checked: an earlier firing this phase may have disabled it.
    let Some(since) = state.transitions.get(id).and_then(|ts| ts.enabled_since) else {
        return Ok(false);
    };
    match window_status(earliest, latest, since, t, dt) {
        WindowStatus::Pending => Ok(false),
        WindowStatus::Due { at } => {
            commit_firing(net, state, id, transition, Phase::Scheduled, at, report)?;
            Ok(true)
        }
        WindowStatus::Expired { deadline } => {
            let fire = settings.window_expiry == WindowExpiryPolicy::FireImmediately;
            warn!(
                transition = %transition.name,
                deadline,
                time = t,
                fire,
                "timed window expired while enabled"
            );
            report.warnings.push(StepWarning::WindowExpired {
                transition: id,
                deadline,
                fired: fire,
            });
            if fire {
                commit_firing(net, state, id, transition, Phase::Scheduled, t, report)?;
            } else if let Some(ts) = state.transitions.get_mut(id) {
                ts.enabled_since = Some(t);
            }
            Ok(fire)
        }
    }
}

fn fire_stochastic(
    net: &Net,
    state: &mut SimulationState,
    id: TransitionId,
    transition: &Transition,
    max_burst: Option<u32>,
    dt: f64,
    report: &mut StepReport,
) -> Result<bool, StepError> {
    let end = state.time + dt;
    let cap = max_burst.unwrap_or(1);
    let mut count = 0;
    while count < cap {
        // `None` once the transition is disabled.
        let Some(at) = state.transitions.get(id).and_then(|ts| ts.scheduled_at()) else {
            break;
        };
        if at >= end {
            break;
        }
        let at = at.max(state.time);
        commit_firing(net, state, id, transition, Phase::Scheduled, at, report)?;
        count += 1;
    }
    Ok(count > 0)
}

/// Fire one discrete transition, update its kind state, record it and
/// refresh enablement as of the firing instant.
fn commit_firing(
    net: &Net,
    state: &mut SimulationState,
    id: TransitionId,
    transition: &Transition,
    phase: Phase,
    at: f64,
    report: &mut StepReport,
) -> Result<(), StepError> {
    behavior::fire(net, id, transition, &mut state.marking)?;

    if let Some(ts) = state.transitions.get_mut(id) {
        ts.firings += 1;
        match (&transition.kind, &mut ts.runtime) {
            // The enabling clock restarts at the firing instant.
            (TransitionKind::Timed { .. }, _) => ts.enabled_since = Some(at),
            (TransitionKind::Stochastic { rate, .. }, KindState::Stochastic { scheduled_at }) => {
                *scheduled_at = Some(at + state.rng.exponential(*rate));
            }
            _ => {}
        }
    }

    trace!(transition = %transition.name, ?phase, time = at, "fired");
    report.firings.push(FiringRecord {
        transition: id,
        kind: transition.kind.tag(),
        phase,
        time: at,
    });
    refresh_at(net, state, at)
}
