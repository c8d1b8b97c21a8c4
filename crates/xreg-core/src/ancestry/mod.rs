//! Version Ancestry Engine.
//!
//! Each Resource's Versions form a forest linked by their `ancestor`
//! attribute; a root points at itself. A [`VersionMode`] decides how
//! ancestors are repaired, how the forest is ordered, which Version is the
//! newest and how children are reparented when a Version is deleted.
//!
//! Two modes exist, selected by the resource model's `versionmode`:
//!
//! - [`ManualMode`] -- ancestors are caller-supplied; only TBD ones are
//!   filled in
//! - [`CreatedAtMode`] -- ancestors are derived from `createdat` order
//!
//! The functions here are pure: they take a snapshot of the Versions and
//! return the ancestor changes to apply. Applying them, and the
//! Resource-wide checks that follow, is the orchestration layer's job.

pub mod createdat;
pub mod graph;
pub mod manual;

use xreg_model::builtin::TBD_ANCESTOR;
use xreg_model::VersionModeKind;
use xreg_types::{Problem, Timestamp};

pub use createdat::CreatedAtMode;
pub use graph::{by_age, AncestryGraph, Position};
pub use manual::ManualMode;

/// Ancestor value meaning "assign during repair".
pub const TBD: &str = TBD_ANCESTOR;

/// The ancestry-relevant view of one Version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    pub id: String,
    pub ancestor: String,
    pub createdat: Option<Timestamp>,
    /// Creation order within the current transaction; 0 if the Version
    /// already existed.
    pub seq: u64,
}

impl VersionInfo {
    pub fn new(id: impl Into<String>, ancestor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ancestor: ancestor.into(),
            createdat: None,
            seq: 0,
        }
    }

    pub fn with_createdat(mut self, createdat: impl Into<Option<Timestamp>>) -> Self {
        self.createdat = createdat.into();
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn is_root(&self) -> bool {
        self.ancestor == self.id
    }

    pub fn is_tbd(&self) -> bool {
        self.ancestor == TBD
    }
}

/// One ancestor change produced by a [`VersionMode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reparent {
    pub version_id: String,
    pub ancestor: String,
}

impl Reparent {
    pub fn new(version_id: impl Into<String>, ancestor: impl Into<String>) -> Self {
        Self {
            version_id: version_id.into(),
            ancestor: ancestor.into(),
        }
    }
}

/// Ancestry strategy for one resource type.
pub trait VersionMode: Send + Sync {
    /// Name as used in the model's `versionmode`.
    fn name(&self) -> &'static str;

    /// Validate ancestors and return the repairs to apply.
    fn check_ancestors(&self, versions: &[VersionInfo]) -> Result<Vec<Reparent>, Problem>;

    /// Ancestor changes needed before `doomed` is removed.
    fn will_delete(&self, versions: &[VersionInfo], doomed: &str) -> Vec<Reparent>;

    /// Ids ordered by (position, createdat, id).
    fn ordered_version_ids(&self, versions: &[VersionInfo]) -> Vec<String> {
        AncestryGraph::new(versions)
            .ordered()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// The last of [`ordered_version_ids`](Self::ordered_version_ids).
    fn newest_version_id(&self, versions: &[VersionInfo]) -> Option<String> {
        AncestryGraph::new(versions).newest().map(String::from)
    }
}

/// The strategy for a model's `versionmode`.
pub fn version_mode(kind: VersionModeKind) -> &'static dyn VersionMode {
    match kind {
        VersionModeKind::Manual => &ManualMode,
        VersionModeKind::CreatedAt => &CreatedAtMode,
    }
}
