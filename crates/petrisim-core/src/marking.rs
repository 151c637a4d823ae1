//! Marking vector and the expression scope built on top of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

use crate::expr::{Scope, TIME_VARIABLES};
use crate::id::PlaceId;
use crate::net::Net;

/// Current quantity in every place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Marking(SecondaryMap<PlaceId, f64>);

impl Marking {
    pub fn new() -> Self {
        Self(SecondaryMap::new())
    }

    /// Marking of `place`; absent places read as zero.
    pub fn get(&self, place: PlaceId) -> f64 {
        self.0.get(place).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, place: PlaceId, value: f64) {
        self.0.insert(place, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, f64)> + '_ {
        self.0.iter().map(|(id, v)| (id, *v))
    }

    /// Sum over all places.
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }
}

/// Resolves expression variables against a net and its current state.
///
/// Lookup order: the transition's kinetic parameters, then place names,
/// then `t` / `time`.
pub struct MarkingScope<'a> {
    pub net: &'a Net,
    pub marking: &'a Marking,
    pub parameters: Option<&'a BTreeMap<String, f64>>,
    pub time: f64,
}

impl Scope for MarkingScope<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        if let Some(v) = self.parameters.and_then(|p| p.get(name)) {
            return Some(*v);
        }
        if let Some(id) = self.net.place_id(name) {
            return Some(self.marking.get(id));
        }
        if TIME_VARIABLES.contains(&name) {
            return Some(self.time);
        }
        None
    }
}
