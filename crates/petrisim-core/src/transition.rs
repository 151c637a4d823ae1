//! Transition kinds and their per-kind runtime state.
//!
//! A transition is exactly one of four kinds. Definitions ([`KindDef`])
//! carry raw expression source and are what authors and loaders produce;
//! [`TransitionKind`] is the compiled form held by a frozen
//! [`Net`](crate::net::Net). Runtime state lives separately in
//! [`TransitionState`] so the topology stays immutable during a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::expr::CompiledExpr;
use crate::id::KindTag;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Kind-specific parameters as authored, before expressions are compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum KindDef {
    /// Fires instantly whenever enabled.
    Immediate { priority: i32 },
    /// Fires once it has been enabled for a duration inside `[earliest, latest]`.
    Timed {
        earliest: f64,
        latest: f64,
        priority: i32,
    },
    /// Fires after an exponentially distributed delay with rate `rate`.
    Stochastic {
        rate: f64,
        max_burst: Option<u32>,
        priority: i32,
    },
    /// Moves tokens continuously at the rate given by `rate_function`.
    Continuous {
        rate_function: String,
        parameters: BTreeMap<String, f64>,
        priority: i32,
    },
}

/// A transition as authored.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionDef {
    pub name: String,
    pub kind: KindDef,
    pub guard: Option<String>,
}

impl TransitionDef {
    pub fn immediate(name: &str, priority: i32) -> Self {
        Self::new(name, KindDef::Immediate { priority })
    }

    pub fn timed(name: &str, earliest: f64, latest: f64) -> Self {
        Self::new(
            name,
            KindDef::Timed {
                earliest,
                latest,
                priority: 0,
            },
        )
    }

    pub fn stochastic(name: &str, rate: f64) -> Self {
        Self::new(
            name,
            KindDef::Stochastic {
                rate,
                max_burst: None,
                priority: 0,
            },
        )
    }

    pub fn continuous(name: &str, rate_function: &str) -> Self {
        Self::new(
            name,
            KindDef::Continuous {
                rate_function: rate_function.to_string(),
                parameters: BTreeMap::new(),
                priority: 0,
            },
        )
    }

    fn new(name: &str, kind: KindDef) -> Self {
        Self {
            name: name.to_string(),
            kind,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: &str) -> Self {
        self.guard = Some(guard.to_string());
        self
    }

    pub fn with_priority(mut self, value: i32) -> Self {
        match &mut self.kind {
            KindDef::Immediate { priority }
            | KindDef::Timed { priority, .. }
            | KindDef::Stochastic { priority, .. }
            | KindDef::Continuous { priority, .. } => *priority = value,
        }
        self
    }

    /// Set a kinetic parameter. Ignored for non-continuous kinds.
    pub fn with_parameter(mut self, key: &str, value: f64) -> Self {
        if let KindDef::Continuous { parameters, .. } = &mut self.kind {
            parameters.insert(key.to_string(), value);
        }
        self
    }

    /// Cap stochastic firings per step. Ignored for other kinds.
    pub fn with_max_burst(mut self, burst: u32) -> Self {
        if let KindDef::Stochastic { max_burst, .. } = &mut self.kind {
            *max_burst = Some(burst);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Compiled transitions
// ---------------------------------------------------------------------------

/// Kind-specific parameters with compiled expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionKind {
    Immediate {
        priority: i32,
    },
    Timed {
        earliest: f64,
        latest: f64,
        priority: i32,
    },
    Stochastic {
        rate: f64,
        max_burst: Option<u32>,
        priority: i32,
    },
    Continuous {
        rate_function: CompiledExpr,
        parameters: BTreeMap<String, f64>,
        priority: i32,
    },
}

impl TransitionKind {
    pub fn tag(&self) -> KindTag {
        match self {
            TransitionKind::Immediate { .. } => KindTag::Immediate,
            TransitionKind::Timed { .. } => KindTag::Timed,
            TransitionKind::Stochastic { .. } => KindTag::Stochastic,
            TransitionKind::Continuous { .. } => KindTag::Continuous,
        }
    }

    /// Declared priority; higher fires first.
    pub fn priority(&self) -> i32 {
        match self {
            TransitionKind::Immediate { priority }
            | TransitionKind::Timed { priority, .. }
            | TransitionKind::Stochastic { priority, .. }
            | TransitionKind::Continuous { priority, .. } => *priority,
        }
    }

    /// Kinetic parameters visible to this transition's expressions.
    pub fn parameters(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            TransitionKind::Continuous { parameters, .. } => Some(parameters),
            _ => None,
        }
    }

    /// Fresh runtime state for this kind.
    pub fn initial_state(&self) -> KindState {
        match self {
            TransitionKind::Immediate { .. } => KindState::Immediate,
            TransitionKind::Timed { .. } => KindState::Timed,
            TransitionKind::Stochastic { .. } => KindState::Stochastic { scheduled_at: None },
            TransitionKind::Continuous { .. } => KindState::Continuous { last_rate: None },
        }
    }
}

/// A transition in a frozen net.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub name: String,
    pub kind: TransitionKind,
    pub guard: Option<CompiledExpr>,
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Per-kind runtime state. Each kind keeps only what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KindState {
    Immediate,
    Timed,
    Stochastic {
        /// Absolute time of the next pending firing.
        scheduled_at: Option<f64>,
    },
    Continuous {
        /// Rate observed at the most recent enablement check.
        last_rate: Option<f64>,
    },
}

/// Mutable state of one transition during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionState {
    /// Time at which the transition last became enabled; `None` while disabled.
    pub enabled_since: Option<f64>,
    pub runtime: KindState,
    /// Discrete firings since the last reset.
    pub firings: u64,
}

impl TransitionState {
    pub fn new(kind: &TransitionKind) -> Self {
        Self {
            enabled_since: None,
            runtime: kind.initial_state(),
            firings: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_since.is_some()
    }

    pub fn scheduled_at(&self) -> Option<f64> {
        match self.runtime {
            KindState::Stochastic { scheduled_at } => scheduled_at,
            _ => None,
        }
    }

    pub fn last_rate(&self) -> Option<f64> {
        match self.runtime {
            KindState::Continuous { last_rate } => last_rate,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_priority_applies_to_every_kind() {
        let defs = [
            TransitionDef::immediate("a", 0),
            TransitionDef::timed("b", 0.0, 1.0),
            TransitionDef::stochastic("c", 1.0),
            TransitionDef::continuous("d", "1"),
        ];
        for def in defs {
            let def = def.with_priority(7);
            let p = match def.kind {
                KindDef::Immediate { priority }
                | KindDef::Timed { priority, .. }
                | KindDef::Stochastic { priority, .. }
                | KindDef::Continuous { priority, .. } => priority,
            };
            assert_eq!(p, 7);
        }
    }

    #[test]
    fn kind_specific_builders_ignore_other_kinds() {
        let def = TransitionDef::immediate("a", 1)
            .with_parameter("k", 2.0)
            .with_max_burst(3);
        assert_eq!(def.kind, KindDef::Immediate { priority: 1 });
    }

    #[test]
    fn initial_state_matches_kind() {
        let kind = TransitionKind::Stochastic {
            rate: 1.0,
            max_burst: None,
            priority: 0,
        };
        let state = TransitionState::new(&kind);
        assert!(!state.is_enabled());
        assert_eq!(state.scheduled_at(), None);
        assert_eq!(state.runtime, KindState::Stochastic { scheduled_at: None });
    }
}
