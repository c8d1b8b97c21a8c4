//! The registry model: which groups and resources exist and which
//! attributes each level carries.
//!
//! Models are loaded from JSON, verified once, and then consulted by the
//! schema engine for every validation. Built-in attributes are merged in by
//! the `*_attributes` accessors; the stored model only holds what the user
//! declared.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribute::{AttrType, Attributes, Item};
use crate::builtin;
use crate::error::{ModelError, ModelResult};
use crate::names::{validate_attribute_name, validate_type_name, NameCharset};
use crate::xid::{Xid, XidTarget};

/// How a Resource maintains its version ancestry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionModeKind {
    /// Ancestors are supplied by the caller.
    #[default]
    Manual,
    /// Ancestors follow creation-time order.
    CreatedAt,
}

impl VersionModeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::CreatedAt => "createdat",
        }
    }
}

fn default_true() -> bool {
    true
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Definition of a resource type inside a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    #[serde(default)]
    pub plural: String,
    pub singular: String,
    /// Maximum number of versions kept; `0` means unlimited.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub maxversions: u64,
    #[serde(default = "default_true")]
    pub setversionid: bool,
    #[serde(default = "default_true")]
    pub setdefaultversionsticky: bool,
    #[serde(default = "default_true")]
    pub hasdocument: bool,
    #[serde(default)]
    pub singleversionroot: bool,
    #[serde(default)]
    pub versionmode: VersionModeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metaattributes: Attributes,
}

impl ResourceModel {
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            maxversions: 0,
            setversionid: true,
            setdefaultversionsticky: true,
            hasdocument: true,
            singleversionroot: false,
            versionmode: VersionModeKind::Manual,
            attributes: Attributes::new(),
            metaattributes: Attributes::new(),
        }
    }

    /// Name of the Resource/Meta id attribute (`fileid`).
    pub fn id_attribute(&self) -> String {
        format!("{}id", self.singular)
    }

    pub fn resource_attributes(&self) -> Attributes {
        builtin::resource_attributes(&self.singular)
    }

    pub fn meta_attributes(&self) -> Attributes {
        merge(builtin::meta_attributes(&self.singular), &self.metaattributes)
    }

    pub fn version_attributes(&self) -> Attributes {
        merge(
            builtin::version_attributes(&self.singular, self.hasdocument),
            &self.attributes,
        )
    }
}

/// Definition of a group type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupModel {
    #[serde(default)]
    pub plural: String,
    pub singular: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceModel>,
}

impl GroupModel {
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            attributes: Attributes::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn id_attribute(&self) -> String {
        format!("{}id", self.singular)
    }

    pub fn find_resource(&self, plural: &str) -> Option<&ResourceModel> {
        self.resources.get(plural)
    }

    pub fn group_attributes(&self) -> Attributes {
        merge(builtin::group_attributes(&self.singular), &self.attributes)
    }

    /// Add a resource type. Replaces any existing definition with the same
    /// plural name.
    pub fn add_resource(&mut self, resource: ResourceModel) {
        self.resources.insert(resource.plural.clone(), resource);
    }
}

/// A complete registry model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupModel>,
    #[serde(skip)]
    changed: bool,
}

/// Overlay user attributes on a built-in table. Built-in names win; the
/// verifier rejects user attributes that collide with them.
fn merge(mut base: Attributes, user: &Attributes) -> Attributes {
    for (name, attr) in user {
        base.entry(name.clone()).or_insert_with(|| attr.clone());
    }
    base
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a model document and fill in names implied by map keys.
    ///
    /// The result is not verified; call [`Model::verify`].
    pub fn from_json(text: &str) -> ModelResult<Self> {
        let mut model: Model = serde_json::from_str(text)?;
        model.normalize();
        Ok(model)
    }

    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Copy map keys into the `plural`/`name` fields when they were
    /// omitted in the document.
    fn normalize(&mut self) {
        fn fill(attrs: &mut Attributes) {
            for (key, attr) in attrs.iter_mut() {
                if attr.name.is_empty() {
                    attr.name = key.clone();
                }
                if let Some(nested) = attr.attributes.as_mut() {
                    fill(nested);
                }
                for ifv in attr.ifvalues.values_mut() {
                    fill(&mut ifv.siblingattributes);
                }
                let mut item = attr.item.as_deref_mut();
                while let Some(it) = item {
                    if let Some(nested) = it.attributes.as_mut() {
                        fill(nested);
                    }
                    item = it.item.as_deref_mut();
                }
            }
        }
        fill(&mut self.attributes);
        for (gkey, group) in self.groups.iter_mut() {
            if group.plural.is_empty() {
                group.plural = gkey.clone();
            }
            fill(&mut group.attributes);
            for (rkey, res) in group.resources.iter_mut() {
                if res.plural.is_empty() {
                    res.plural = rkey.clone();
                }
                fill(&mut res.attributes);
                fill(&mut res.metaattributes);
            }
        }
    }

    pub fn find_group(&self, plural: &str) -> Option<&GroupModel> {
        self.groups.get(plural)
    }

    pub fn find_resource(&self, group: &str, resource: &str) -> Option<&ResourceModel> {
        self.groups.get(group)?.resources.get(resource)
    }

    pub fn registry_attributes(&self, spec_version: &str) -> Attributes {
        merge(builtin::registry_attributes(spec_version), &self.attributes)
    }

    /// Add or replace a group type and mark the model changed.
    pub fn add_group(&mut self, group: GroupModel) {
        self.groups.insert(group.plural.clone(), group);
        self.changed = true;
    }

    /// Replace the whole definition, keeping the change flag set.
    pub fn replace_with(&mut self, other: Model) {
        *self = other;
        self.changed = true;
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn mark_saved(&mut self) {
        self.changed = false;
    }

    /// Returns `true` if `path` names an abstract entity type: `/`,
    /// `/GROUPS`, `/GROUPS/RESOURCES` or `/GROUPS/RESOURCES/versions`.
    pub fn has_abstract(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix('/') else {
            return false;
        };
        if rest.is_empty() {
            return true;
        }
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [g] => self.groups.contains_key(*g),
            [g, r] => self.find_resource(g, r).is_some(),
            [g, r, "versions"] => self.find_resource(g, r).is_some(),
            _ => false,
        }
    }

    /// Check that the types named by an address exist.
    pub fn check_xid(&self, xid: &Xid) -> Result<(), String> {
        let Some(g) = &xid.group_type else {
            return Ok(());
        };
        let group = self
            .find_group(g)
            .ok_or_else(|| format!("unknown group type {g:?}"))?;
        if let Some(r) = &xid.resource_type {
            if group.find_resource(r).is_none() {
                return Err(format!("unknown resource type {r:?} in group {g:?}"));
            }
        }
        Ok(())
    }

    /// Check that the types named by a target exist.
    pub fn check_target(&self, target: &XidTarget) -> ModelResult<()> {
        let group = self.find_group(&target.group).ok_or_else(|| {
            ModelError::invalid(
                format!("target {target}"),
                format!("unknown group type {:?}", target.group),
            )
        })?;
        if let Some(r) = &target.resource {
            if group.find_resource(r).is_none() {
                return Err(ModelError::invalid(
                    format!("target {target}"),
                    format!("unknown resource type {r:?}"),
                ));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------

    /// Verify the model's internal consistency.
    pub fn verify(&self) -> ModelResult<()> {
        let builtins: HashSet<String> = builtin::registry_attributes("").into_keys().collect();
        self.verify_attributes("attributes", &self.attributes, &builtins, NameCharset::Strict)?;

        let mut singulars = HashSet::new();
        for (key, group) in &self.groups {
            let path = format!("groups.{key}");
            validate_type_name("group", &group.plural)?;
            validate_type_name("group", &group.singular)?;
            if &group.plural != key {
                return Err(ModelError::invalid(path, format!("plural {:?} does not match its key", group.plural)));
            }
            if group.plural == group.singular {
                return Err(ModelError::invalid(path, "plural and singular must differ"));
            }
            if !singulars.insert(group.singular.clone()) || self.groups.contains_key(&group.singular) {
                return Err(ModelError::invalid(path, format!("singular {:?} is already in use", group.singular)));
            }
            let builtins: HashSet<String> =
                builtin::group_attributes(&group.singular).into_keys().collect();
            self.verify_attributes(&format!("{path}.attributes"), &group.attributes, &builtins, NameCharset::Strict)?;

            let mut res_singulars = HashSet::new();
            for (rkey, res) in &group.resources {
                let rpath = format!("{path}.resources.{rkey}");
                validate_type_name("resource", &res.plural)?;
                validate_type_name("resource", &res.singular)?;
                if &res.plural != rkey {
                    return Err(ModelError::invalid(rpath, format!("plural {:?} does not match its key", res.plural)));
                }
                if res.plural == res.singular {
                    return Err(ModelError::invalid(rpath, "plural and singular must differ"));
                }
                if !res_singulars.insert(res.singular.clone()) || group.resources.contains_key(&res.singular) {
                    return Err(ModelError::invalid(rpath, format!("singular {:?} is already in use", res.singular)));
                }
                let vbuilt: HashSet<String> = builtin::version_attributes(&res.singular, res.hasdocument)
                    .into_keys()
                    .chain([res.id_attribute()])
                    .collect();
                self.verify_attributes(&format!("{rpath}.attributes"), &res.attributes, &vbuilt, NameCharset::Strict)?;
                let mbuilt: HashSet<String> = builtin::meta_attributes(&res.singular).into_keys().collect();
                self.verify_attributes(&format!("{rpath}.metaattributes"), &res.metaattributes, &mbuilt, NameCharset::Strict)?;
            }
        }
        debug!(groups = self.groups.len(), "verified model");
        Ok(())
    }

    fn verify_attributes(
        &self,
        path: &str,
        attrs: &Attributes,
        reserved: &HashSet<String>,
        charset: NameCharset,
    ) -> ModelResult<()> {
        for (name, attr) in attrs {
            let apath = format!("{path}.{name}");
            validate_attribute_name(name, charset)?;
            if &attr.name != name {
                return Err(ModelError::invalid(apath, format!("name {:?} does not match its key", attr.name)));
            }
            if reserved.contains(name) {
                return Err(ModelError::invalid(apath, "attribute is defined by the registry"));
            }
            self.verify_type(&apath, attr.attr_type, attr.target.as_deref(), attr.item.as_deref(), attr.attributes.as_ref(), attr.charset())?;

            if let Some(values) = &attr.enum_values {
                if !attr.attr_type.is_scalar() {
                    return Err(ModelError::invalid(apath, "enum is only allowed on scalar types"));
                }
                if values.iter().any(|v| v.is_composite() || v.is_null()) {
                    return Err(ModelError::invalid(apath, "enum values must be scalars"));
                }
            }
            if let Some(default) = &attr.default {
                if !attr.attr_type.is_scalar() || default.is_composite() {
                    return Err(ModelError::invalid(apath, "default is only allowed on scalar types"));
                }
            }
            for (trigger, ifv) in &attr.ifvalues {
                if trigger.is_empty() {
                    return Err(ModelError::invalid(apath, "ifvalues trigger must not be empty"));
                }
                for sib in ifv.siblingattributes.keys() {
                    if sib == "*" {
                        return Err(ModelError::invalid(apath, "ifvalues may not define '*'"));
                    }
                    if attrs.contains_key(sib) || reserved.contains(sib) {
                        return Err(ModelError::invalid(
                            apath,
                            format!("ifvalues sibling {sib:?} conflicts with an existing attribute"),
                        ));
                    }
                }
                self.verify_attributes(&format!("{apath}.ifvalues.{trigger}"), &ifv.siblingattributes, reserved, charset)?;
            }
        }
        Ok(())
    }

    fn verify_type(
        &self,
        path: &str,
        attr_type: AttrType,
        target: Option<&str>,
        item: Option<&Item>,
        attributes: Option<&Attributes>,
        charset: NameCharset,
    ) -> ModelResult<()> {
        match attr_type {
            AttrType::Map | AttrType::Array => {
                let item = item.ok_or_else(|| ModelError::invalid(path, format!("{attr_type} requires an item")))?;
                self.verify_type(
                    &format!("{path}.item"),
                    item.attr_type,
                    item.target.as_deref(),
                    item.item.as_deref(),
                    item.attributes.as_ref(),
                    item.namecharset.unwrap_or_default(),
                )?;
            }
            AttrType::Object => {
                if let Some(nested) = attributes {
                    self.verify_attributes(&format!("{path}.attributes"), nested, &HashSet::new(), charset)?;
                }
            }
            _ => {
                if item.is_some() {
                    return Err(ModelError::invalid(path, format!("{attr_type} must not have an item")));
                }
            }
        }
        match (attr_type, target) {
            (AttrType::Xid, Some(t)) => {
                let parsed = XidTarget::parse(t).map_err(|e| ModelError::invalid(path, e))?;
                self.check_target(&parsed)?;
            }
            (_, Some(_)) => return Err(ModelError::invalid(path, "target is only allowed on xid")),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILES_MODEL: &str = r#"{
        "groups": {
            "dirs": {
                "singular": "dir",
                "resources": {
                    "files": {
                        "singular": "file",
                        "maxversions": 2,
                        "attributes": {
                            "format": { "type": "string" },
                            "ref": { "type": "xid", "target": "/dirs/files[/versions]" }
                        }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn load_fills_names_and_defaults() {
        let model = Model::from_json(FILES_MODEL).unwrap();
        model.verify().unwrap();
        let res = model.find_resource("dirs", "files").unwrap();
        assert_eq!(res.plural, "files");
        assert_eq!(res.maxversions, 2);
        assert!(res.setversionid);
        assert!(res.hasdocument);
        assert_eq!(res.versionmode, VersionModeKind::Manual);
        assert_eq!(res.attributes["format"].name, "format");
        assert!(!model.is_changed());
    }

    #[test]
    fn version_attributes_merge_user_and_builtin() {
        let model = Model::from_json(FILES_MODEL).unwrap();
        let attrs = model.find_resource("dirs", "files").unwrap().version_attributes();
        assert!(attrs.contains_key("format"));
        assert!(attrs.contains_key("ancestor"));
        assert!(attrs.contains_key("file"));
        assert!(!attrs.contains_key("fileid"));
    }

    #[test]
    fn unknown_version_mode_fails_to_parse() {
        let text = r#"{"groups":{"dirs":{"singular":"dir","resources":{"files":{"singular":"file","versionmode":"auto"}}}}}"#;
        assert!(matches!(Model::from_json(text), Err(ModelError::Parse(_))));
    }

    #[test]
    fn target_must_reference_known_types() {
        let text = r#"{"groups":{"dirs":{"singular":"dir","attributes":{
            "peer": {"type":"xid","target":"/nope"}}}}}"#;
        let model = Model::from_json(text).unwrap();
        let err = model.verify().unwrap_err();
        assert!(err.to_string().contains("unknown group type"));
    }

    #[test]
    fn builtin_collision_rejected() {
        let text = r#"{"groups":{"dirs":{"singular":"dir","attributes":{
            "epoch": {"type":"string"}}}}}"#;
        let model = Model::from_json(text).unwrap();
        assert!(model.verify().is_err());
    }

    #[test]
    fn collection_requires_item() {
        let text = r#"{"attributes":{"tags":{"type":"array"}}}"#;
        let model = Model::from_json(text).unwrap();
        assert!(model.verify().unwrap_err().to_string().contains("requires an item"));
    }

    #[test]
    fn singular_must_differ_and_be_unique() {
        let same = r#"{"groups":{"dirs":{"singular":"dirs"}}}"#;
        assert!(Model::from_json(same).unwrap().verify().is_err());
        let dup = r#"{"groups":{"dirs":{"singular":"x"},"others":{"singular":"x"}}}"#;
        assert!(Model::from_json(dup).unwrap().verify().is_err());
    }

    #[test]
    fn ifvalues_conflict_rejected() {
        let text = r#"{"attributes":{
            "kind": {"type":"string","ifvalues":{"a":{"siblingattributes":{"other":{"type":"string"}}}}},
            "other": {"type":"string"}}}"#;
        let model = Model::from_json(text).unwrap();
        assert!(model.verify().unwrap_err().to_string().contains("conflicts"));
    }

    #[test]
    fn abstract_paths() {
        let model = Model::from_json(FILES_MODEL).unwrap();
        assert!(model.has_abstract("/"));
        assert!(model.has_abstract("/dirs"));
        assert!(model.has_abstract("/dirs/files"));
        assert!(model.has_abstract("/dirs/files/versions"));
        assert!(!model.has_abstract("/dirs/other"));
        assert!(!model.has_abstract("dirs"));
    }

    #[test]
    fn change_tracking() {
        let mut model = Model::new();
        assert!(!model.is_changed());
        model.add_group(GroupModel::new("dirs", "dir"));
        assert!(model.is_changed());
        model.mark_saved();
        assert!(!model.is_changed());
    }

    #[test]
    fn json_roundtrip_keeps_definition() {
        let model = Model::from_json(FILES_MODEL).unwrap();
        let again = Model::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(again, model);
    }
}
