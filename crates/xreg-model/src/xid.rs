//! Cross-entity references.
//!
//! An [`Xid`] is the registry-relative address of an entity
//! (`/dirs/d1/files/f1/versions/v1`). An [`XidTarget`] restricts which kind
//! of entity an `xid` attribute may reference
//! (`/GROUPS[/RESOURCES[/versions|[/versions]]]`).

use std::fmt;

use crate::names::is_valid_id;

/// A parsed entity address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Xid {
    pub group_type: Option<String>,
    pub group_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub version_id: Option<String>,
}

impl Xid {
    /// Parse an address. `/` alone addresses the registry.
    pub fn parse(text: &str) -> Result<Self, String> {
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| "must start with '/'".to_string())?;
        if rest.is_empty() {
            return Ok(Self::default());
        }
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err("must not contain empty segments".into());
        }
        if !matches!(parts.len(), 2 | 4 | 6) {
            return Err("must name a group, resource or version".into());
        }
        if parts.len() == 6 && parts[4] != "versions" {
            return Err(format!("expected 'versions', found {:?}", parts[4]));
        }
        for (i, part) in parts.iter().enumerate() {
            if i % 2 == 1 && !is_valid_id(part) {
                return Err(format!("invalid id {part:?}"));
            }
        }
        let get = |i: usize| parts.get(i).map(|s| s.to_string());
        Ok(Self {
            group_type: get(0),
            group_id: get(1),
            resource_type: get(2),
            resource_id: get(3),
            version_id: get(5),
        })
    }

    pub fn is_registry(&self) -> bool {
        self.group_type.is_none()
    }

    /// Storage path of the addressed entity (no leading slash).
    pub fn to_path(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for (ty, id) in [
            (&self.group_type, &self.group_id),
            (&self.resource_type, &self.resource_id),
        ] {
            if let (Some(ty), Some(id)) = (ty, id) {
                parts.push(ty);
                parts.push(id);
            }
        }
        if let Some(v) = &self.version_id {
            parts.push("versions");
            parts.push(v);
        }
        parts.join("/")
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.to_path())
    }
}

/// Whether a target admits version addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VersionsPart {
    /// `/G/R`: resources only.
    No,
    /// `/G/R/versions`: versions only.
    Required,
    /// `/G/R[/versions]`: resources or versions.
    Optional,
}

/// A parsed `target` of an `xid` attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct XidTarget {
    pub group: String,
    pub resource: Option<String>,
    pub versions: VersionsPart,
}

impl XidTarget {
    pub fn parse(text: &str) -> Result<Self, String> {
        let bad = || format!("{text:?} must be /GROUPS[/RESOURCES[/versions|[/versions]]]");
        let rest = text.strip_prefix('/').ok_or_else(bad)?;
        let (rest, optional) = match rest.strip_suffix("[/versions]") {
            Some(head) => (head, true),
            None => (rest, false),
        };
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(bad());
        }
        match (parts.as_slice(), optional) {
            ([g], false) => Ok(Self {
                group: g.to_string(),
                resource: None,
                versions: VersionsPart::No,
            }),
            ([g, r], opt) => Ok(Self {
                group: g.to_string(),
                resource: Some(r.to_string()),
                versions: if opt {
                    VersionsPart::Optional
                } else {
                    VersionsPart::No
                },
            }),
            ([g, r, "versions"], false) => Ok(Self {
                group: g.to_string(),
                resource: Some(r.to_string()),
                versions: VersionsPart::Required,
            }),
            _ => Err(bad()),
        }
    }

    /// Returns `true` if `xid` addresses an entity of the targeted kind.
    pub fn matches(&self, xid: &Xid) -> bool {
        if xid.group_type.as_deref() != Some(self.group.as_str()) {
            return false;
        }
        match &self.resource {
            None => xid.resource_type.is_none(),
            Some(r) => {
                if xid.resource_type.as_deref() != Some(r.as_str()) {
                    return false;
                }
                match self.versions {
                    VersionsPart::No => xid.version_id.is_none(),
                    VersionsPart::Required => xid.version_id.is_some(),
                    VersionsPart::Optional => true,
                }
            }
        }
    }
}

impl fmt::Display for XidTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.group)?;
        if let Some(r) = &self.resource {
            write!(f, "/{r}")?;
            match self.versions {
                VersionsPart::No => {}
                VersionsPart::Required => write!(f, "/versions")?,
                VersionsPart::Optional => write!(f, "[/versions]")?,
            }
        }
        Ok(())
    }
}
