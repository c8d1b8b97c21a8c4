use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xreg_types::EntityType;

/// Storage surrogate key of an entity.
pub type Sid = Uuid;

/// Allocate a fresh, time-ordered sid.
pub fn new_sid() -> Sid {
    Uuid::now_v7()
}

/// One entity in the registry tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRow {
    pub sid: Sid,
    /// Sid of the owning registry; a registry row points at itself.
    pub registry_sid: Sid,
    pub parent_sid: Option<Sid>,
    pub kind: EntityType,
    /// Collection the entity lives in under its parent (`dirs`, `files`,
    /// `versions`, `meta`); empty for a registry.
    pub plural: String,
    /// Caller-visible id.
    pub uid: String,
    /// Registry-relative path (`dirs/d1/files/f1/versions/v1`).
    pub path: String,
    /// Type-only path (`dirs/files/versions`).
    pub abstract_path: String,
}

/// Encoding of a stored property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    Bool,
    Int,
    UInt,
    Float,
    String,
    /// Typed empty-map marker.
    Map,
    /// Typed empty-array marker.
    Array,
}

/// One scalar leaf (or empty-composite marker) of an entity's property tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropRow {
    pub entity_sid: Sid,
    /// Storage-encoded [`PropPath`](xreg_types::PropPath).
    pub name: String,
    /// Text form of the value; empty for composite markers.
    pub value: String,
    pub prop_type: PropType,
}
