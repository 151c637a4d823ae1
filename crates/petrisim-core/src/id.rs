use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a place (token container) in the net.
    pub struct PlaceId;

    /// Identifies a transition in the net.
    pub struct TransitionId;

    /// Identifies an arc connecting a place and a transition.
    pub struct ArcId;
}

/// Discriminant of a transition kind, without its parameters.
///
/// Used in persisted records, step reports and snapshots where the full
/// kind (with a compiled rate function) is not needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindTag {
    Immediate,
    Timed,
    Stochastic,
    Continuous,
}

impl KindTag {
    /// Whether transitions of this kind move whole tokens atomically.
    pub fn is_discrete(self) -> bool {
        !matches!(self, KindTag::Continuous)
    }
}

impl std::fmt::Display for KindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KindTag::Immediate => "immediate",
            KindTag::Timed => "timed",
            KindTag::Stochastic => "stochastic",
            KindTag::Continuous => "continuous",
        };
        f.write_str(s)
    }
}
