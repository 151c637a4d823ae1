//! Net topology: places, transitions and arcs.
//!
//! A [`NetBuilder`] collects definitions by name and [`NetBuilder::build`]
//! validates them as a whole, producing an immutable [`Net`]. Every
//! structural rule is enforced here so that nothing malformed can reach
//! the stepping loop.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};

use crate::expr::{self, CompiledExpr, ExpressionError};
use crate::id::{ArcId, PlaceId, TransitionId};
use crate::marking::Marking;
use crate::sim::StateHash;
use crate::transition::{KindDef, Transition, TransitionDef, TransitionKind};

// ---------------------------------------------------------------------------
// Places and arcs
// ---------------------------------------------------------------------------

/// A token container.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub name: String,
    pub initial_marking: f64,
    /// Upper bound on the marking; `None` means unbounded.
    pub capacity: Option<f64>,
}

/// How an arc interacts with its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcKind {
    /// Consumes on input, produces on output.
    #[serde(alias = "normal")]
    Ordinary,
    /// Requires `marking >= weight`, never consumes.
    #[serde(alias = "read", alias = "catalyst")]
    Test,
    /// Requires `marking < weight`, never consumes.
    Inhibitor,
}

/// Direction of token flow relative to the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArcDirection {
    /// Place to transition.
    Input,
    /// Transition to place.
    Output,
}

/// A weighted connection between one place and one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
    pub name: String,
    pub place: PlaceId,
    pub transition: TransitionId,
    pub direction: ArcDirection,
    pub kind: ArcKind,
    pub weight: f64,
}

impl Arc {
    /// Whether firing through this arc changes the place's marking.
    pub fn moves_tokens(&self) -> bool {
        self.kind == ArcKind::Ordinary
    }
}

/// An arc as authored: endpoints by name, in flow direction.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcDef {
    pub name: String,
    pub source: String,
    pub target: String,
    pub kind: ArcKind,
    pub weight: f64,
}

/// A place as authored.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceDef {
    pub name: String,
    pub initial_marking: f64,
    pub capacity: Option<f64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Topology rule violations, detected at build time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("empty name")]
    EmptyName,

    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    #[error("arc '{arc}' references unknown node '{name}'")]
    UnknownEndpoint { arc: String, name: String },

    #[error("arc '{arc}' must connect a place and a transition")]
    NotBipartite { arc: String },

    #[error("{kind:?} arc '{arc}' must run from a place to a transition")]
    ReadArcFromTransition { arc: String, kind: ArcKind },

    #[error("arc '{arc}' has invalid weight {weight}")]
    InvalidWeight { arc: String, weight: f64 },

    #[error("place '{place}' has invalid initial marking {marking}")]
    InvalidMarking { place: String, marking: f64 },

    #[error("place '{place}' has invalid capacity {capacity}")]
    InvalidCapacity { place: String, capacity: f64 },

    #[error("place '{place}' initial marking {marking} exceeds capacity {capacity}")]
    MarkingAboveCapacity {
        place: String,
        marking: f64,
        capacity: f64,
    },

    #[error("timed transition '{transition}' has invalid window [{earliest}, {latest}]")]
    InvalidWindow {
        transition: String,
        earliest: f64,
        latest: f64,
    },

    #[error("stochastic transition '{transition}' has invalid rate {rate}")]
    InvalidRate { transition: String, rate: f64 },

    #[error("stochastic transition '{transition}' has a burst cap of zero")]
    ZeroBurst { transition: String },

    #[error("continuous transition '{transition}' has non-finite parameter '{parameter}'")]
    InvalidParameter {
        transition: String,
        parameter: String,
    },
}

/// Any reason a net definition cannot be built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("expression on transition '{transition}': {source}")]
    Expression {
        transition: String,
        source: ExpressionError,
    },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects place, transition and arc definitions for a [`Net`].
#[derive(Debug, Default, Clone)]
pub struct NetBuilder {
    places: Vec<PlaceDef>,
    transitions: Vec<TransitionDef>,
    arcs: Vec<ArcDef>,
}

impl NetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unbounded place.
    pub fn place(&mut self, name: &str, initial_marking: f64) -> &mut Self {
        self.add_place(PlaceDef {
            name: name.to_string(),
            initial_marking,
            capacity: None,
        })
    }

    /// Register a place with an upper bound.
    pub fn bounded_place(&mut self, name: &str, initial_marking: f64, capacity: f64) -> &mut Self {
        self.add_place(PlaceDef {
            name: name.to_string(),
            initial_marking,
            capacity: Some(capacity),
        })
    }

    pub fn add_place(&mut self, def: PlaceDef) -> &mut Self {
        self.places.push(def);
        self
    }

    pub fn transition(&mut self, def: TransitionDef) -> &mut Self {
        self.transitions.push(def);
        self
    }

    /// Register an arc from `source` to `target`. Arc names default to
    /// `"{source}->{target}"`, suffixed on collision.
    pub fn arc(&mut self, source: &str, target: &str, kind: ArcKind, weight: f64) -> &mut Self {
        let base = format!("{source}->{target}");
        let mut name = base.clone();
        let mut n = 1;
        while self.arcs.iter().any(|a| a.name == name) {
            n += 1;
            name = format!("{base}#{n}");
        }
        self.add_arc(ArcDef {
            name,
            source: source.to_string(),
            target: target.to_string(),
            kind,
            weight,
        })
    }

    pub fn ordinary(&mut self, source: &str, target: &str, weight: f64) -> &mut Self {
        self.arc(source, target, ArcKind::Ordinary, weight)
    }

    pub fn test_arc(&mut self, place: &str, transition: &str, weight: f64) -> &mut Self {
        self.arc(place, transition, ArcKind::Test, weight)
    }

    pub fn inhibitor(&mut self, place: &str, transition: &str, weight: f64) -> &mut Self {
        self.arc(place, transition, ArcKind::Inhibitor, weight)
    }

    pub fn add_arc(&mut self, def: ArcDef) -> &mut Self {
        self.arcs.push(def);
        self
    }

    /// Validate every definition and freeze the topology.
    pub fn build(&self) -> Result<Net, NetError> {
        let mut net = Net::default();
        let mut names: HashMap<&str, Node> = HashMap::new();

        for def in &self.places {
            check_name(&def.name, &names)?;
            if !def.initial_marking.is_finite() || def.initial_marking < 0.0 {
                return Err(StructuralError::InvalidMarking {
                    place: def.name.clone(),
                    marking: def.initial_marking,
                }
                .into());
            }
            let capacity = match def.capacity {
                Some(c) if c.is_nan() || c < 0.0 => {
                    return Err(StructuralError::InvalidCapacity {
                        place: def.name.clone(),
                        capacity: c,
                    }
                    .into());
                }
                Some(c) if c.is_infinite() => None,
                other => other,
            };
            if let Some(c) = capacity {
                if def.initial_marking > c {
                    return Err(StructuralError::MarkingAboveCapacity {
                        place: def.name.clone(),
                        marking: def.initial_marking,
                        capacity: c,
                    }
                    .into());
                }
            }
            let id = net.places.insert(Place {
                name: def.name.clone(),
                initial_marking: def.initial_marking,
                capacity,
            });
            net.place_order.push(id);
            net.place_names.insert(def.name.clone(), id);
            names.insert(&def.name, Node::Place(id));
        }

        for def in &self.transitions {
            check_name(&def.name, &names)?;
            let transition = compile_transition(def, &net.place_names)?;
            let id = net.transitions.insert(transition);
            net.transition_order.push(id);
            net.transition_names.insert(def.name.clone(), id);
            net.inputs.insert(id, Vec::new());
            net.outputs.insert(id, Vec::new());
            names.insert(&def.name, Node::Transition(id));
        }

        let mut arc_names: HashMap<&str, ()> = HashMap::new();
        for def in &self.arcs {
            if def.name.is_empty() {
                return Err(StructuralError::EmptyName.into());
            }
            if arc_names.insert(&def.name, ()).is_some() {
                return Err(StructuralError::DuplicateName(def.name.clone()).into());
            }
            if !def.weight.is_finite() || def.weight <= 0.0 {
                return Err(StructuralError::InvalidWeight {
                    arc: def.name.clone(),
                    weight: def.weight,
                }
                .into());
            }
            let resolve = |name: &str| {
                names
                    .get(name)
                    .copied()
                    .ok_or_else(|| StructuralError::UnknownEndpoint {
                        arc: def.name.clone(),
                        name: name.to_string(),
                    })
            };
            let (place, transition, direction) = match (resolve(&def.source)?, resolve(&def.target)?) {
                (Node::Place(p), Node::Transition(t)) => (p, t, ArcDirection::Input),
                (Node::Transition(t), Node::Place(p)) => (p, t, ArcDirection::Output),
                _ => {
                    return Err(StructuralError::NotBipartite {
                        arc: def.name.clone(),
                    }
                    .into());
                }
            };
            if direction == ArcDirection::Output && def.kind != ArcKind::Ordinary {
                return Err(StructuralError::ReadArcFromTransition {
                    arc: def.name.clone(),
                    kind: def.kind,
                }
                .into());
            }
            let id = net.arcs.insert(Arc {
                name: def.name.clone(),
                place,
                transition,
                direction,
                kind: def.kind,
                weight: def.weight,
            });
            net.arc_order.push(id);
            let list = match direction {
                ArcDirection::Input => net.inputs.get_mut(transition),
                ArcDirection::Output => net.outputs.get_mut(transition),
            };
            if let Some(list) = list {
                list.push(id);
            }
        }

        net.fingerprint = net.compute_fingerprint();
        Ok(net)
    }
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Place(PlaceId),
    Transition(TransitionId),
}

fn check_name(name: &str, names: &HashMap<&str, Node>) -> Result<(), StructuralError> {
    if name.is_empty() {
        return Err(StructuralError::EmptyName);
    }
    if names.contains_key(name) {
        return Err(StructuralError::DuplicateName(name.to_string()));
    }
    Ok(())
}

fn compile_transition(
    def: &TransitionDef,
    places: &HashMap<String, PlaceId>,
) -> Result<Transition, NetError> {
    let structural = |e: StructuralError| NetError::Structural(e);
    let name = def.name.clone();

    let kind = match &def.kind {
        KindDef::Immediate { priority } => TransitionKind::Immediate {
            priority: *priority,
        },
        KindDef::Timed {
            earliest,
            latest,
            priority,
        } => {
            // `latest` may be infinite (no deadline), `earliest` may not.
            if !earliest.is_finite() || *earliest < 0.0 || latest.is_nan() || latest < earliest {
                return Err(structural(StructuralError::InvalidWindow {
                    transition: name,
                    earliest: *earliest,
                    latest: *latest,
                }));
            }
            TransitionKind::Timed {
                earliest: *earliest,
                latest: *latest,
                priority: *priority,
            }
        }
        KindDef::Stochastic {
            rate,
            max_burst,
            priority,
        } => {
            if !rate.is_finite() || *rate <= 0.0 {
                return Err(structural(StructuralError::InvalidRate {
                    transition: name,
                    rate: *rate,
                }));
            }
            if *max_burst == Some(0) {
                return Err(structural(StructuralError::ZeroBurst { transition: name }));
            }
            TransitionKind::Stochastic {
                rate: *rate,
                max_burst: *max_burst,
                priority: *priority,
            }
        }
        KindDef::Continuous {
            rate_function,
            parameters,
            priority,
        } => {
            if let Some((key, _)) = parameters.iter().find(|(_, v)| !v.is_finite()) {
                return Err(structural(StructuralError::InvalidParameter {
                    transition: name,
                    parameter: key.clone(),
                }));
            }
            let compiled = compile_expr(&name, rate_function, places, Some(parameters))?;
            TransitionKind::Continuous {
                rate_function: compiled,
                parameters: parameters.clone(),
                priority: *priority,
            }
        }
    };

    let guard = match &def.guard {
        Some(source) => Some(compile_expr(&name, source, places, kind.parameters())?),
        None => None,
    };

    Ok(Transition { name, kind, guard })
}

/// Compile an expression and check every free name is resolvable.
fn compile_expr(
    transition: &str,
    source: &str,
    places: &HashMap<String, PlaceId>,
    parameters: Option<&BTreeMap<String, f64>>,
) -> Result<CompiledExpr, NetError> {
    let wrap = |source| NetError::Expression {
        transition: transition.to_string(),
        source,
    };
    let compiled = expr::validate(source).map_err(&wrap)?;
    for name in compiled.variables() {
        let known = parameters.is_some_and(|p| p.contains_key(name))
            || places.contains_key(name)
            || expr::TIME_VARIABLES.contains(&name.as_str())
            || expr::CONSTANTS.contains(&name.as_str());
        if !known {
            return Err(wrap(ExpressionError::UndefinedVariable(name.clone())));
        }
    }
    Ok(compiled)
}

// ---------------------------------------------------------------------------
// Frozen net
// ---------------------------------------------------------------------------

/// Immutable topology. Iteration follows registration order.
#[derive(Debug, Default, Clone)]
pub struct Net {
    places: SlotMap<PlaceId, Place>,
    transitions: SlotMap<TransitionId, Transition>,
    arcs: SlotMap<ArcId, Arc>,
    place_order: Vec<PlaceId>,
    transition_order: Vec<TransitionId>,
    arc_order: Vec<ArcId>,
    place_names: HashMap<String, PlaceId>,
    transition_names: HashMap<String, TransitionId>,
    inputs: SecondaryMap<TransitionId, Vec<ArcId>>,
    outputs: SecondaryMap<TransitionId, Vec<ArcId>>,
    fingerprint: u64,
}

impl Net {
    pub fn place(&self, id: PlaceId) -> Option<&Place> {
        self.places.get(id)
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.get(id)
    }

    pub fn arc(&self, id: ArcId) -> Option<&Arc> {
        self.arcs.get(id)
    }

    pub fn place_id(&self, name: &str) -> Option<PlaceId> {
        self.place_names.get(name).copied()
    }

    pub fn transition_id(&self, name: &str) -> Option<TransitionId> {
        self.transition_names.get(name).copied()
    }

    /// Places in registration order.
    pub fn places(&self) -> impl Iterator<Item = (PlaceId, &Place)> {
        self.place_order
            .iter()
            .filter_map(|&id| self.places.get(id).map(|p| (id, p)))
    }

    /// Transitions in registration order.
    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.transition_order
            .iter()
            .filter_map(|&id| self.transitions.get(id).map(|t| (id, t)))
    }

    /// Arcs in registration order.
    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arc_order
            .iter()
            .filter_map(|&id| self.arcs.get(id).map(|a| (id, a)))
    }

    pub fn transition_ids(&self) -> &[TransitionId] {
        &self.transition_order
    }

    /// Position of a transition in registration order.
    pub fn transition_index(&self, id: TransitionId) -> Option<usize> {
        self.transition_order.iter().position(|&t| t == id)
    }

    /// Place-to-transition arcs of every kind.
    pub fn input_arcs(&self, id: TransitionId) -> impl Iterator<Item = &Arc> {
        self.inputs
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|&a| self.arcs.get(a))
    }

    /// Transition-to-place arcs (always ordinary).
    pub fn output_arcs(&self, id: TransitionId) -> impl Iterator<Item = &Arc> {
        self.outputs
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|&a| self.arcs.get(a))
    }

    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    /// The marking every run starts from.
    pub fn initial_marking(&self) -> Marking {
        let mut marking = Marking::new();
        for (id, place) in self.places() {
            marking.set(id, place.initial_marking);
        }
        marking
    }

    /// Hash of the topology and every transition's kind parameters, used to
    /// match snapshots to the net they came from.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut h = StateHash::new();
        for (_, p) in self.places() {
            h.write(p.name.as_bytes());
            h.write_f64(p.capacity.unwrap_or(-1.0));
        }
        for (_, t) in self.transitions() {
            h.write(t.name.as_bytes());
            h.write(t.kind.tag().to_string().as_bytes());
            h.write_u64(t.kind.priority() as i64 as u64);
            match &t.kind {
                TransitionKind::Immediate { .. } => {}
                TransitionKind::Timed {
                    earliest, latest, ..
                } => {
                    h.write_f64(*earliest);
                    h.write_f64(*latest);
                }
                TransitionKind::Stochastic {
                    rate, max_burst, ..
                } => {
                    h.write_f64(*rate);
                    h.write_u32(max_burst.unwrap_or(0));
                }
                TransitionKind::Continuous {
                    rate_function,
                    parameters,
                    ..
                } => {
                    h.write(rate_function.source().as_bytes());
                    for (name, value) in parameters {
                        h.write(name.as_bytes());
                        h.write_f64(*value);
                    }
                }
            }
            if let Some(g) = &t.guard {
                h.write(g.source().as_bytes());
            }
        }
        for (_, a) in self.arcs() {
            h.write(a.name.as_bytes());
            h.write_f64(a.weight);
            h.write_u32(a.kind as u32);
        }
        h.finish()
    }
}
