//! Resource and Meta orchestration.
//!
//! A Resource owns one Meta entity and one or more Versions. The Meta
//! records which Version is the default, whether that choice is pinned
//! (`defaultversionsticky`), and optionally an `xref` making the Resource
//! an alias of another Resource of the same type.
//!
//! Every mutating operation ends with [`Tx::validate_resource`], which runs
//! the Resource-wide ancestry checks once for the whole batch.

use std::fmt;

use tracing::debug;
use xreg_model::builtin::{CACHED_CREATEDAT, CACHED_EPOCH, COMPUTED_ATTRIBUTES, NEXT_VERSION_ID};
use xreg_model::names::is_valid_id;
use xreg_model::ResourceModel;
use xreg_types::{AddMode, EntityType, Object, Problem, ProblemKind, Timestamp, Value};

use crate::ancestry::{by_age, version_mode, AncestryGraph, Reparent, VersionInfo, VersionMode, TBD};
use crate::error::RegistryResult;
use crate::group::group_path;
use crate::tx::{user_object, NewEntity, Tx};

/// Address of one Resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub group_type: String,
    pub group_id: String,
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(
        group_type: impl Into<String>,
        group_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            group_type: group_type.into(),
            group_id: group_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Parse `/GROUPS/gid/RESOURCES/rid`; the leading slash is optional.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.strip_prefix('/').unwrap_or(text);
        let parts: Vec<&str> = text.split('/').collect();
        match parts.as_slice() {
            [g, gid, r, rid] if parts.iter().all(|p| !p.is_empty()) => Some(Self::new(*g, *gid, *r, *rid)),
            _ => None,
        }
    }

    pub fn group_path(&self) -> String {
        group_path(&self.group_type, &self.group_id)
    }

    /// `dirs/d1/files/f1`
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group_type, self.group_id, self.resource_type, self.resource_id
        )
    }

    pub fn meta_path(&self) -> String {
        format!("{}/meta", self.path())
    }

    pub fn version_path(&self, version_id: &str) -> String {
        format!("{}/versions/{version_id}", self.path())
    }

    /// `dirs/files`
    pub fn abstract_path(&self) -> String {
        format!("{}/{}", self.group_type, self.resource_type)
    }

    /// `/dirs/d1/files/f1`, as used in problem subjects and `xref`.
    pub fn address(&self) -> String {
        format!("/{}", self.path())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// A request to change a Resource's default Version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefaultVersion {
    /// `"null"`: unpin and track the newest Version again.
    Unpin,
    /// `"request"`: pin to the Version processed by this request.
    ThisRequest,
    /// Pin to a named Version.
    Id(String),
}

impl DefaultVersion {
    pub fn parse(text: &str) -> Self {
        match text {
            "null" => Self::Unpin,
            "request" => Self::ThisRequest,
            id => Self::Id(id.to_string()),
        }
    }
}

/// How a Resource or Version write is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub mode: AddMode,
    pub default_version: Option<DefaultVersion>,
}

impl WriteOptions {
    pub fn new(mode: AddMode) -> Self {
        Self {
            mode,
            default_version: None,
        }
    }

    pub fn with_default_version(mut self, request: DefaultVersion) -> Self {
        self.default_version = Some(request);
        self
    }
}

impl From<AddMode> for WriteOptions {
    fn from(mode: AddMode) -> Self {
        Self::new(mode)
    }
}

fn already_exists(address: String) -> Problem {
    Problem::new(ProblemKind::AlreadyExists).with_subject(address)
}

fn readonly(rref: &ResourceRef) -> Problem {
    Problem::new(ProblemKind::Readonly).with_subject(rref.address())
}

/// Split an optional nested map out of a write body.
fn take_map(body: &mut Object, name: &str) -> Result<Option<Object>, Problem> {
    match body.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Map(map)) => Ok(Some(map)),
        Some(other) => Err(Problem::invalid_attribute(
            name,
            format!("must be a map, not {}", other.kind_name()),
        )),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl Tx {
    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Create or update a Resource.
    ///
    /// `body` holds the default Version's attributes plus, optionally,
    /// the Resource id, a `meta` map and a `versions` map keyed by
    /// Version id.
    pub fn upsert_resource(
        &mut self,
        rref: &ResourceRef,
        mut body: Object,
        opts: impl Into<WriteOptions>,
    ) -> RegistryResult<()> {
        let opts = opts.into();
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?.clone();
        let id_attr = rm.id_attribute();
        if let Some(id) = body.remove(&id_attr) {
            if !id.is_null() && id.as_str() != Some(rref.resource_id.as_str()) {
                return Err(Problem::new(ProblemKind::MismatchedId)
                    .with_subject(rref.address())
                    .with_arg("name", &id_attr)
                    .with_arg("invalid_id", id.to_plain_string())
                    .with_arg("expected_id", &rref.resource_id)
                    .into());
            }
        }
        let meta_body = take_map(&mut body, "meta")?;
        let versions_body = take_map(&mut body, "versions")?;
        let body = user_object(body);

        let existed = self.load(&rref.path())?;
        match (opts.mode, existed) {
            (AddMode::Add, true) => return Err(already_exists(rref.address()).into()),
            (AddMode::Update, false) => return Err(Problem::not_found(rref.address()).into()),
            _ => {}
        }
        if existed && self.is_readonly(rref)? && (!body.is_empty() || versions_body.is_some()) {
            return Err(readonly(rref).into());
        }
        if !existed {
            self.create_resource(rref, &rm)?;
        }

        let change = self.apply_meta(rref, &rm, meta_body, opts.mode)?;
        if change.xref {
            if let Some(name) = body.keys().next().cloned().or(versions_body.map(|_| "versions".to_string())) {
                return Err(Problem::new(ProblemKind::ExtraXrefAttribute)
                    .with_subject(rref.address())
                    .with_arg("name", name)
                    .into());
            }
        } else {
            let version_mode = if opts.mode.is_merge() {
                AddMode::Patch
            } else {
                AddMode::Upsert
            };
            let mut processed: Option<String> = None;
            let had_versions = versions_body.is_some();
            if let Some(versions) = versions_body {
                for (vid, vbody) in versions {
                    let Value::Map(vbody) = vbody else {
                        return Err(Problem::invalid_attribute(
                            format!("versions.{vid}"),
                            "must be a map",
                        )
                        .into());
                    };
                    processed = Some(self.write_version(rref, &rm, Some(vid), vbody, version_mode)?);
                }
            }
            let no_versions = self.version_rows(rref)?.is_empty();
            if !body.is_empty() || (!had_versions && no_versions) {
                let target = match non_empty_str(body.get("versionid")) {
                    Some(vid) => Some(vid.to_string()),
                    None if existed && !change.cleared_xref => self.default_version_id(rref)?,
                    None => None,
                };
                processed = Some(self.write_version(rref, &rm, target, body, version_mode)?);
            }
            if let Some(request) = &opts.default_version {
                self.apply_default_request(rref, &rm, request, processed.as_deref())?;
            }
        }

        self.validate_resource(rref)?;
        if !existed {
            self.touch(&rref.group_path())?;
        }
        Ok(())
    }

    /// Create the Resource and Meta rows, and the Group if needed. The
    /// Meta is left staged; [`Tx::validate_resource`] saves it.
    pub(crate) fn create_resource(&mut self, rref: &ResourceRef, rm: &ResourceModel) -> RegistryResult<()> {
        let id_attr = rm.id_attribute();
        if !is_valid_id(&rref.resource_id) {
            return Err(Problem::invalid_attribute(&id_attr, format!("invalid id {:?}", rref.resource_id))
                .with_subject(rref.address())
                .into());
        }
        let gpath = rref.group_path();
        if !self.load(&gpath)? {
            self.upsert_group(&rref.group_type, &rref.group_id, Object::new(), AddMode::Add)?;
        }
        let group_sid = self.entity_row(&gpath)?.sid;

        let path = rref.path();
        let mut obj = Object::new();
        obj.insert(id_attr.clone(), Value::from(rref.resource_id.as_str()));
        self.create_entity(NewEntity {
            kind: EntityType::Resource,
            parent_sid: Some(group_sid),
            plural: rref.resource_type.clone(),
            uid: rref.resource_id.clone(),
            path: path.clone(),
            abstract_path: rref.abstract_path(),
            object: obj.clone(),
        })?;
        self.save_new(&path)?;
        let resource_sid = self.entity_row(&path)?.sid;

        obj.insert(NEXT_VERSION_ID.to_string(), Value::from(1i64));
        self.create_entity(NewEntity {
            kind: EntityType::Meta,
            parent_sid: Some(resource_sid),
            plural: "meta".to_string(),
            uid: rref.resource_id.clone(),
            path: rref.meta_path(),
            abstract_path: format!("{}/meta", rref.abstract_path()),
            object: obj,
        })?;
        debug!(resource = %rref, "created resource");
        Ok(())
    }

    /// Update a Resource's Meta.
    pub fn update_meta(&mut self, rref: &ResourceRef, body: Object, mode: AddMode) -> RegistryResult<()> {
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?.clone();
        if !self.load(&rref.path())? {
            return Err(Problem::not_found(rref.address()).into());
        }
        let change = self.apply_meta(rref, &rm, Some(body), mode)?;
        if change.cleared_xref {
            self.write_version(rref, &rm, None, Object::new(), AddMode::Upsert)?;
        }
        self.validate_resource(rref)
    }

    /// Stage a Meta update. Setting `xref` drops the local Versions and
    /// caches `epoch` and `createdat`; clearing it restores them.
    fn apply_meta(
        &mut self,
        rref: &ResourceRef,
        rm: &ResourceModel,
        body: Option<Object>,
        mode: AddMode,
    ) -> RegistryResult<MetaChange> {
        let meta_path = rref.meta_path();
        let meta = self.entity_mut(&meta_path)?;
        let was_xref = non_empty_str(meta.get("xref")).map(String::from);
        let Some(mut body) = body.map(user_object) else {
            return Ok(MetaChange {
                xref: was_xref.is_some(),
                cleared_xref: false,
            });
        };

        let new_xref = match body.remove("xref") {
            None if mode.is_merge() => was_xref.clone(),
            None | Some(Value::Null) => None,
            Some(Value::String(x)) if x.is_empty() => None,
            Some(Value::String(x)) => Some(x),
            Some(other) => {
                return Err(Problem::invalid_attribute("xref", format!("must be a string, not {}", other.kind_name()))
                    .with_subject(rref.address())
                    .into())
            }
        };

        if let Some(xref) = new_xref {
            let id_attr = rm.id_attribute();
            let extra = body
                .iter()
                .filter(|(k, v)| {
                    !v.is_null() && **k != id_attr && !COMPUTED_ATTRIBUTES.contains(&k.as_str())
                })
                .map(|(k, _)| k.clone())
                .next();
            if let Some(name) = extra {
                return Err(Problem::new(ProblemKind::ExtraXrefAttribute)
                    .with_subject(rref.address())
                    .with_arg("name", name)
                    .into());
            }
            let mut obj = Object::new();
            obj.insert(id_attr, Value::from(rref.resource_id.as_str()));
            obj.insert("xref".to_string(), Value::from(xref.as_str()));
            if was_xref.is_none() {
                let meta = self.cached_mut(&meta_path)?;
                if let Some(epoch) = meta.object.get("epoch").cloned() {
                    obj.insert(CACHED_EPOCH.to_string(), epoch);
                }
                if let Some(createdat) = meta.object.get("createdat").cloned() {
                    obj.insert(CACHED_CREATEDAT.to_string(), createdat);
                }
                self.drop_local_versions(rref)?;
            }
            self.cached_mut(&meta_path)?.set_new_object(obj)?;
            debug!(resource = %rref, xref = %xref, "resource is now an xref");
            return Ok(MetaChange {
                xref: true,
                cleared_xref: false,
            });
        }

        if let Some(true) = body.get("defaultversionsticky").and_then(Value::as_bool) {
            if !rm.setdefaultversionsticky {
                return Err(Problem::new(ProblemKind::SetDefaultVersionIdNotAllowed)
                    .with_subject(rref.address())
                    .into());
            }
        }

        let cleared_xref = was_xref.is_some();
        if cleared_xref {
            let meta = self.cached_mut(&meta_path)?;
            let current = meta.current().clone();
            if let Some(epoch) = current.get(CACHED_EPOCH) {
                body.insert("epoch".to_string(), epoch.clone());
            }
            if let Some(createdat) = current.get(CACHED_CREATEDAT) {
                body.insert("createdat".to_string(), createdat.clone());
            }
            body.insert(CACHED_EPOCH.to_string(), Value::Null);
            body.insert(CACHED_CREATEDAT.to_string(), Value::Null);
            body.insert(NEXT_VERSION_ID.to_string(), Value::from(1i64));
            body.insert("xref".to_string(), Value::Null);
            meta.set_new_object(body)?;
            debug!(resource = %rref, "xref cleared");
        } else {
            let meta = self.cached_mut(&meta_path)?;
            if mode.is_merge() {
                meta.patch(body)?;
            } else {
                meta.set_new_object(body)?;
            }
        }
        Ok(MetaChange {
            xref: false,
            cleared_xref,
        })
    }

    fn drop_local_versions(&mut self, rref: &ResourceRef) -> RegistryResult<()> {
        let mut content = Vec::new();
        for vid in self.version_rows(rref)? {
            let path = rref.version_path(&vid);
            content.extend(self.version_content_id(&path)?);
            self.delete_entity(&path)?;
        }
        self.release_content(content)
    }

    /// Apply a default-version request to the staged Meta.
    pub(crate) fn apply_default_request(
        &mut self,
        rref: &ResourceRef,
        rm: &ResourceModel,
        request: &DefaultVersion,
        processed: Option<&str>,
    ) -> RegistryResult<()> {
        let meta_path = rref.meta_path();
        let target = match request {
            DefaultVersion::Unpin => {
                self.entity_mut(&meta_path)?.just_set("defaultversionsticky", false)?;
                return Ok(());
            }
            DefaultVersion::ThisRequest => processed
                .map(String::from)
                .ok_or_else(|| Problem::bad_request("no version was processed").with_subject(rref.address()))?,
            DefaultVersion::Id(id) => id.clone(),
        };
        if !rm.setdefaultversionsticky {
            return Err(Problem::new(ProblemKind::SetDefaultVersionIdNotAllowed)
                .with_subject(rref.address())
                .into());
        }
        if !self.load(&rref.version_path(&target))? {
            return Err(Problem::new(ProblemKind::UnknownId)
                .with_subject(rref.address())
                .with_arg("name", "defaultversionid")
                .with_arg("id", &target)
                .into());
        }
        let meta = self.entity_mut(&meta_path)?;
        meta.just_set("defaultversionsticky", true)?;
        meta.just_set("defaultversionid", target)?;
        Ok(())
    }

    /// Change which Version is the default.
    pub fn set_default_version(&mut self, rref: &ResourceRef, request: DefaultVersion) -> RegistryResult<()> {
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?.clone();
        if !self.load(&rref.path())? {
            return Err(Problem::not_found(rref.address()).into());
        }
        self.apply_default_request(rref, &rm, &request, None)?;
        self.validate_resource(rref)
    }

    /// Delete a Resource with its Meta, Versions and document bodies.
    /// Touches the Group.
    pub fn delete_resource(&mut self, rref: &ResourceRef) -> RegistryResult<()> {
        self.resource_model(&rref.group_type, &rref.resource_type)?;
        let path = rref.path();
        if !self.lock(&path)? {
            return Err(Problem::not_found(rref.address()).into());
        }
        if self.is_readonly(rref)? {
            return Err(readonly(rref).into());
        }
        let row = self.entity_row(&path)?;
        let content = self.content_under(&row)?;
        self.delete_entity(&path)?;
        self.release_content(content)?;
        debug!(resource = %rref, "deleted resource");
        self.touch(&rref.group_path())
    }

    // ---------------------------------------------------------------
    // Resource-wide validation
    // ---------------------------------------------------------------

    /// Repair and check a Resource's Versions, then save its Meta.
    ///
    /// Runs, in order: ancestor repair, default-version tracking,
    /// `maxversions` eviction, the single-root check and the cycle check.
    /// Each failure aborts the request.
    pub fn validate_resource(&mut self, rref: &ResourceRef) -> RegistryResult<()> {
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?.clone();
        let mode = version_mode(rm.versionmode);
        let meta_path = rref.meta_path();
        if !self.lock(&meta_path)? {
            return Err(Problem::not_found(rref.address()).into());
        }
        if self.meta_xref(rref)?.is_some() {
            return self.save_entity(&meta_path);
        }
        let subject = rref.address();

        let versions = self.version_infos(rref)?;
        let repairs = mode
            .check_ancestors(&versions)
            .map_err(|p| p.or_subject(subject.as_str()))?;
        self.apply_reparents(rref, repairs)?;

        let mut versions = self.version_infos(rref)?;
        self.ensure_latest(rref, mode, &versions)?;

        if rm.maxversions > 0 {
            while versions.len() as u64 > rm.maxversions {
                let default = self.default_version_id(rref)?;
                let victim = by_age(&versions)
                    .into_iter()
                    .map(|v| v.id.clone())
                    .find(|id| Some(id) != default.as_ref());
                let Some(victim) = victim else {
                    break;
                };
                debug!(resource = %rref, version = %victim, "evicting version over maxversions");
                self.remove_version(rref, mode, &victim)?;
                versions = self.version_infos(rref)?;
            }
        }

        let graph = AncestryGraph::new(&versions);
        if rm.singleversionroot {
            let roots = graph.roots();
            if roots.len() > 1 {
                return Err(Problem::new(ProblemKind::MultipleRoots)
                    .with_subject(subject)
                    .with_arg("list", roots.join(","))
                    .into());
            }
        }
        let cycles = graph.cycles();
        if !cycles.is_empty() {
            return Err(Problem::new(ProblemKind::AncestorCircularReference)
                .with_subject(subject)
                .with_arg("list", cycles.join(","))
                .into());
        }

        let has_default = self
            .cached(&meta_path)
            .is_some_and(|m| non_empty_str(m.get("defaultversionid")).is_some());
        if has_default {
            self.save_entity(&meta_path)?;
        }
        Ok(())
    }

    /// Point a non-sticky (or empty) default at the newest Version. Only
    /// writes when the value changes.
    fn ensure_latest(
        &mut self,
        rref: &ResourceRef,
        mode: &dyn VersionMode,
        versions: &[VersionInfo],
    ) -> RegistryResult<()> {
        let meta_path = rref.meta_path();
        let meta = self.entity_mut(&meta_path)?;
        let sticky = meta
            .get("defaultversionsticky")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let current = non_empty_str(meta.get("defaultversionid")).map(String::from);
        if let (true, Some(id)) = (sticky, &current) {
            if versions.iter().any(|v| &v.id == id) {
                return Ok(());
            }
            return Err(Problem::new(ProblemKind::UnknownId)
                .with_subject(rref.address())
                .with_arg("name", "defaultversionid")
                .with_arg("id", id)
                .into());
        }
        let Some(newest) = mode.newest_version_id(versions) else {
            return Ok(());
        };
        if current.as_deref() != Some(newest.as_str()) {
            debug!(resource = %rref, version = %newest, "default version follows newest");
            meta.just_set("defaultversionid", newest)?;
        }
        Ok(())
    }

    fn apply_reparents(&mut self, rref: &ResourceRef, repairs: Vec<Reparent>) -> RegistryResult<()> {
        for repair in repairs {
            let path = rref.version_path(&repair.version_id);
            debug!(version = %path, ancestor = %repair.ancestor, "reparenting version");
            self.entity_mut(&path)?.just_set("ancestor", repair.ancestor)?;
            self.save_entity(&path)?;
        }
        Ok(())
    }

    /// Reparent around a Version and delete it, without Resource-wide
    /// validation.
    pub(crate) fn remove_version(
        &mut self,
        rref: &ResourceRef,
        mode: &dyn VersionMode,
        version_id: &str,
    ) -> RegistryResult<()> {
        let versions = self.version_infos(rref)?;
        let repairs = mode.will_delete(&versions, version_id);
        self.apply_reparents(rref, repairs)?;
        let path = rref.version_path(version_id);
        let content: Vec<String> = self.version_content_id(&path)?.into_iter().collect();
        self.delete_entity(&path)?;
        self.release_content(content)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub(crate) fn is_readonly(&mut self, rref: &ResourceRef) -> RegistryResult<bool> {
        Ok(self
            .entity(&rref.meta_path())?
            .and_then(|m| m.get("readonly"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// The Resource's `xref` target, if it is one.
    pub fn meta_xref(&mut self, rref: &ResourceRef) -> RegistryResult<Option<String>> {
        Ok(self
            .entity(&rref.meta_path())?
            .and_then(|m| non_empty_str(m.get("xref")))
            .map(String::from))
    }

    /// The `xref` target of `rref`, parsed, if it is an existing Resource.
    fn xref_target(&mut self, rref: &ResourceRef) -> RegistryResult<Option<ResourceRef>> {
        let Some(xref) = self.meta_xref(rref)? else {
            return Ok(None);
        };
        match ResourceRef::parse(&xref) {
            Some(target) if target != *rref && self.load(&target.path())? => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Ids of the Resource's local Versions, sorted.
    pub(crate) fn version_rows(&mut self, rref: &ResourceRef) -> RegistryResult<Vec<String>> {
        let path = rref.path();
        if !self.load(&path)? {
            return Ok(Vec::new());
        }
        let sid = self.entity_row(&path)?.sid;
        let rows = self.store_ref()?.children(sid, "versions")?;
        Ok(rows.into_iter().map(|r| r.uid).collect())
    }

    /// The ancestry view of every local Version.
    pub(crate) fn version_infos(&mut self, rref: &ResourceRef) -> RegistryResult<Vec<VersionInfo>> {
        let mut out = Vec::new();
        for vid in self.version_rows(rref)? {
            let path = rref.version_path(&vid);
            let Some(v) = self.entity(&path)? else {
                continue;
            };
            let ancestor = v.get_str("ancestor").unwrap_or(TBD).to_string();
            let createdat = v.get_str("createdat").and_then(|t| Timestamp::parse(t).ok());
            out.push(VersionInfo::new(vid, ancestor).with_createdat(createdat).with_seq(v.seq));
        }
        Ok(out)
    }

    /// The default Version id, following an xref.
    pub fn default_version_id(&mut self, rref: &ResourceRef) -> RegistryResult<Option<String>> {
        let source = self.xref_target(rref)?.unwrap_or_else(|| rref.clone());
        Ok(self
            .entity(&source.meta_path())?
            .and_then(|m| non_empty_str(m.get("defaultversionid")))
            .map(String::from))
    }

    /// Version ids in ancestry order, oldest first, following an xref.
    pub fn version_ids(&mut self, rref: &ResourceRef) -> RegistryResult<Vec<String>> {
        let source = self.xref_target(rref)?.unwrap_or_else(|| rref.clone());
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?;
        let mode = version_mode(rm.versionmode);
        let versions = self.version_infos(&source)?;
        Ok(mode.ordered_version_ids(&versions))
    }

    /// Ids of every Resource of a type in a Group, sorted.
    pub fn resource_ids(&mut self, group_type: &str, group_id: &str, resource_type: &str) -> RegistryResult<Vec<String>> {
        self.resource_model(group_type, resource_type)?;
        let gpath = group_path(group_type, group_id);
        if !self.load(&gpath)? {
            return Ok(Vec::new());
        }
        let sid = self.entity_row(&gpath)?.sid;
        let rows = self.store_ref()?.children(sid, resource_type)?;
        Ok(rows.into_iter().map(|r| r.uid).collect())
    }

    /// The Resource as callers see it: its default Version's attributes
    /// plus the Resource id. An xref Resource shows its target's.
    pub fn resource(&mut self, rref: &ResourceRef) -> RegistryResult<Option<Object>> {
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?;
        let id_attr = rm.id_attribute();
        if !self.load(&rref.path())? {
            return Ok(None);
        }
        let source = self.xref_target(rref)?.unwrap_or_else(|| rref.clone());
        let mut view = match self.default_version_id(&source)? {
            Some(vid) => self.get(&source.version_path(&vid))?.unwrap_or_default(),
            None => Object::new(),
        };
        view.insert(id_attr, Value::from(rref.resource_id.as_str()));
        Ok(Some(view))
    }

    /// The Resource's Meta. An xref Meta shows its own id and `xref` over
    /// the target's Meta.
    pub fn meta(&mut self, rref: &ResourceRef) -> RegistryResult<Option<Object>> {
        let id_attr = self.resource_model(&rref.group_type, &rref.resource_type)?.id_attribute();
        let Some(own) = self.get(&rref.meta_path())? else {
            return Ok(None);
        };
        let Some(target) = self.xref_target(rref)? else {
            return Ok(Some(own));
        };
        let mut view = self.get(&target.meta_path())?.unwrap_or_default();
        view.insert(id_attr, Value::from(rref.resource_id.as_str()));
        if let Some(xref) = own.get("xref") {
            view.insert("xref".to_string(), xref.clone());
        }
        Ok(Some(view))
    }
}

/// What a Meta update did to the Resource's xref state.
struct MetaChange {
    xref: bool,
    cleared_xref: bool,
}
