//! The persisted record shape of a net and its markings.
//!
//! Records reference nodes by string id and keep every kind parameter as an
//! optional field, so they map cleanly onto JSON, TOML and RON documents.
//! [`Simulation::from_record`] and [`Simulation::to_record`] round-trip a
//! record through the engine without loss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::Simulation;
use crate::id::KindTag;
use crate::marking::Marking;
use crate::net::{ArcDef, ArcDirection, ArcKind, Net, NetBuilder, NetError, PlaceDef};
use crate::settings::{Settings, SettingsValidationError};
use crate::transition::{KindDef, TransitionDef, TransitionKind};

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// A whole net as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetRecord {
    #[serde(default)]
    pub places: Vec<PlaceRecord>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
    #[serde(default)]
    pub arcs: Vec<ArcRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub id: String,
    /// Current marking; defaults to `initial_marking` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marking: Option<f64>,
    #[serde(default)]
    pub initial_marking: f64,
    /// Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
}

/// A transition as persisted. Which optional fields are required depends
/// on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: String,
    pub kind: KindTag,
    #[serde(default)]
    pub priority: i32,
    /// Stochastic firing rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_burst: Option<u32>,
    /// Timed window start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest: Option<f64>,
    /// Timed window end; absent means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_function: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcRecord {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default = "default_arc_kind")]
    pub kind: ArcKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_arc_kind() -> ArcKind {
    ArcKind::Ordinary
}

fn default_weight() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("{kind} transition '{transition}' is missing '{field}'")]
    MissingField {
        transition: String,
        kind: KindTag,
        field: &'static str,
    },

    #[error("place '{place}' has current marking {marking} outside [0, {capacity}]")]
    InvalidMarking {
        place: String,
        marking: f64,
        capacity: f64,
    },

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Settings(#[from] SettingsValidationError),

    #[error("json: {0}")]
    Json(String),
}

// ---------------------------------------------------------------------------
// Record -> net
// ---------------------------------------------------------------------------

impl TransitionRecord {
    fn missing(&self, field: &'static str) -> RecordError {
        RecordError::MissingField {
            transition: self.id.clone(),
            kind: self.kind,
            field,
        }
    }

    /// Convert to a definition, checking the kind's required fields.
    pub fn to_def(&self) -> Result<TransitionDef, RecordError> {
        let kind = match self.kind {
            KindTag::Immediate => KindDef::Immediate {
                priority: self.priority,
            },
            KindTag::Timed => KindDef::Timed {
                earliest: self.earliest.ok_or_else(|| self.missing("earliest"))?,
                latest: self.latest.unwrap_or(f64::INFINITY),
                priority: self.priority,
            },
            KindTag::Stochastic => KindDef::Stochastic {
                rate: self.rate.ok_or_else(|| self.missing("rate"))?,
                max_burst: self.max_burst,
                priority: self.priority,
            },
            KindTag::Continuous => KindDef::Continuous {
                rate_function: self
                    .rate_function
                    .clone()
                    .ok_or_else(|| self.missing("rate_function"))?,
                parameters: self.parameters.clone(),
                priority: self.priority,
            },
        };
        Ok(TransitionDef {
            name: self.id.clone(),
            kind,
            guard: self.guard.clone(),
        })
    }
}

impl NetRecord {
    /// Register every record entry on a fresh builder.
    pub fn to_builder(&self) -> Result<NetBuilder, RecordError> {
        let mut builder = NetBuilder::new();
        for p in &self.places {
            builder.add_place(PlaceDef {
                name: p.id.clone(),
                initial_marking: p.initial_marking,
                capacity: p.capacity,
            });
        }
        for t in &self.transitions {
            builder.transition(t.to_def()?);
        }
        for a in &self.arcs {
            builder.add_arc(ArcDef {
                name: a.id.clone(),
                source: a.source_id.clone(),
                target: a.target_id.clone(),
                kind: a.kind,
                weight: a.weight,
            });
        }
        Ok(builder)
    }

    pub fn build(&self) -> Result<Net, RecordError> {
        Ok(self.to_builder()?.build()?)
    }

    /// Describe a net, taking current markings from `markings` when given.
    pub fn from_net(net: &Net, markings: Option<&Marking>) -> Self {
        let places = net
            .places()
            .map(|(id, p)| PlaceRecord {
                id: p.name.clone(),
                marking: markings.map(|m| m.get(id)),
                initial_marking: p.initial_marking,
                capacity: p.capacity,
            })
            .collect();

        let transitions = net
            .transitions()
            .map(|(_, t)| {
                let mut record = TransitionRecord {
                    id: t.name.clone(),
                    kind: t.kind.tag(),
                    priority: t.kind.priority(),
                    rate: None,
                    max_burst: None,
                    earliest: None,
                    latest: None,
                    rate_function: None,
                    parameters: BTreeMap::new(),
                    guard: t.guard.as_ref().map(|g| g.source().to_string()),
                };
                match &t.kind {
                    TransitionKind::Immediate { .. } => {}
                    TransitionKind::Timed {
                        earliest, latest, ..
                    } => {
                        record.earliest = Some(*earliest);
                        record.latest = latest.is_finite().then_some(*latest);
                    }
                    TransitionKind::Stochastic {
                        rate, max_burst, ..
                    } => {
                        record.rate = Some(*rate);
                        record.max_burst = *max_burst;
                    }
                    TransitionKind::Continuous {
                        rate_function,
                        parameters,
                        ..
                    } => {
                        record.rate_function = Some(rate_function.source().to_string());
                        record.parameters = parameters.clone();
                    }
                }
                record
            })
            .collect();

        let arcs = net
            .arcs()
            .map(|(_, a)| {
                let place = net.place(a.place).map(|p| p.name.clone()).unwrap_or_default();
                let transition = net
                    .transition(a.transition)
                    .map(|t| t.name.clone())
                    .unwrap_or_default();
                let (source_id, target_id) = match a.direction {
                    ArcDirection::Input => (place, transition),
                    ArcDirection::Output => (transition, place),
                };
                ArcRecord {
                    id: a.name.clone(),
                    source_id,
                    target_id,
                    kind: a.kind,
                    weight: a.weight,
                }
            })
            .collect();

        Self {
            places,
            transitions,
            arcs,
        }
    }

    #[cfg(feature = "json")]
    pub fn from_json(text: &str) -> Result<Self, RecordError> {
        serde_json::from_str(text).map_err(|e| RecordError::Json(e.to_string()))
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, RecordError> {
        serde_json::to_string_pretty(self).map_err(|e| RecordError::Json(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Simulation round-trip
// ---------------------------------------------------------------------------

impl Simulation {
    /// Build a simulation from a record. Places whose record carries a
    /// current marking start from it instead of the initial marking; a
    /// reset still returns to the initial marking.
    pub fn from_record(record: &NetRecord, settings: Settings) -> Result<Self, RecordError> {
        let net = record.build()?;
        let mut sim = Simulation::new(net, settings)?;
        for p in &record.places {
            let Some(marking) = p.marking else {
                continue;
            };
            let capacity = p.capacity.unwrap_or(f64::INFINITY);
            if !marking.is_finite() || marking < 0.0 || marking > capacity {
                return Err(RecordError::InvalidMarking {
                    place: p.id.clone(),
                    marking,
                    capacity,
                });
            }
            if let Some(id) = sim.net.place_id(&p.id) {
                sim.state.marking.set(id, marking);
            }
        }
        Ok(sim)
    }

    /// Describe the net together with its current markings.
    pub fn to_record(&self) -> NetRecord {
        NetRecord::from_net(&self.net, Some(&self.state.marking))
    }
}
