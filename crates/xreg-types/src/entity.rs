use std::fmt;

use serde::{Deserialize, Serialize};

/// The five kinds of entity in a registry tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Registry,
    Group,
    Resource,
    Meta,
    Version,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Group => "group",
            Self::Resource => "resource",
            Self::Meta => "meta",
            Self::Version => "version",
        }
    }

    /// Stable numeric code used in storage rows.
    pub fn code(&self) -> u8 {
        match self {
            Self::Registry => 0,
            Self::Group => 1,
            Self::Resource => 2,
            Self::Meta => 3,
            Self::Version => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Registry),
            1 => Some(Self::Group),
            2 => Some(Self::Resource),
            3 => Some(Self::Meta),
            4 => Some(Self::Version),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entity instance may be mutated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessMode {
    #[default]
    ForRead,
    ForWrite,
}

/// How an upsert treats existing and missing entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddMode {
    /// Create only; the entity must not exist.
    Add,
    /// Replace only; the entity must exist.
    Update,
    /// Create, or replace an existing entity.
    Upsert,
    /// Create, or merge into an existing entity.
    Patch,
}

impl AddMode {
    /// Returns `true` if top-level attributes missing from the request are
    /// kept from the existing entity.
    pub fn is_merge(&self) -> bool {
        matches!(self, Self::Patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for t in [
            EntityType::Registry,
            EntityType::Group,
            EntityType::Resource,
            EntityType::Meta,
            EntityType::Version,
        ] {
            assert_eq!(EntityType::from_code(t.code()), Some(t));
        }
        assert_eq!(EntityType::from_code(9), None);
    }

    #[test]
    fn only_patch_merges() {
        assert!(AddMode::Patch.is_merge());
        assert!(!AddMode::Upsert.is_merge());
        assert!(!AddMode::Update.is_merge());
    }
}
