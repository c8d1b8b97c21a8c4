//! The staged-mutation entity shared by all five entity kinds.
//!
//! An [`Entity`] holds its committed property tree (`object`) and, while a
//! mutation is in flight, a staged copy (`new_object`). Changes are staged
//! with [`Entity::just_set`], [`Entity::set_new_object`] or
//! [`Entity::patch`], validated against the entity level's attributes, and
//! persisted by `save`, which rewrites every property row and folds the
//! staged tree back into `object`.
//!
//! # Invariants
//!
//! - Only a `ForWrite` entity may be staged or saved.
//! - `epoch` is bumped at most once per transaction (`epoch_set`).
//! - `#`-prefixed properties survive replace-style updates.

use tracing::debug;
use xreg_model::names::is_valid_id;
use xreg_model::{Attributes, CheckHook, Model, UpdateHook};
use xreg_schema::{validate_object, Hooks, ValidateOptions};
use xreg_store::{flatten, EntityRow, Sid, StoreTx};
use xreg_types::value::strip_object_nulls;
use xreg_types::{
    is_system_name, AccessMode, EntityType, Object, PathSeg, Problem, ProblemKind, PropPath,
    Timestamp, Value,
};

use crate::error::{RegistryError, RegistryResult};

/// One Registry, Group, Resource, Meta or Version.
#[derive(Clone, Debug)]
pub struct Entity {
    pub(crate) kind: EntityType,
    pub(crate) registry_sid: Sid,
    pub(crate) registry_uid: String,
    pub(crate) sid: Sid,
    pub(crate) parent_sid: Option<Sid>,
    pub(crate) uid: String,
    pub(crate) plural: String,
    pub(crate) path: String,
    pub(crate) abstract_path: String,
    pub(crate) object: Object,
    pub(crate) new_object: Option<Object>,
    pub(crate) access: AccessMode,
    pub(crate) epoch_set: bool,
    pub(crate) mod_set: bool,
    /// Creation order within the current transaction; 0 for loaded entities.
    pub(crate) seq: u64,
}

impl Entity {
    /// An entity loaded from its stored row.
    pub(crate) fn from_row(row: EntityRow, registry_uid: &str, object: Object, access: AccessMode) -> Self {
        Self {
            kind: row.kind,
            registry_sid: row.registry_sid,
            registry_uid: registry_uid.to_string(),
            sid: row.sid,
            parent_sid: row.parent_sid,
            uid: row.uid,
            plural: row.plural,
            path: row.path,
            abstract_path: row.abstract_path,
            object,
            new_object: None,
            access,
            epoch_set: false,
            mod_set: false,
            seq: 0,
        }
    }

    pub(crate) fn to_row(&self) -> EntityRow {
        EntityRow {
            sid: self.sid,
            registry_sid: self.registry_sid,
            parent_sid: self.parent_sid,
            kind: self.kind,
            plural: self.plural.clone(),
            uid: self.uid.clone(),
            path: self.path.clone(),
            abstract_path: self.abstract_path.clone(),
        }
    }

    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn abstract_path(&self) -> &str {
        &self.abstract_path
    }

    pub fn registry_uid(&self) -> &str {
        &self.registry_uid
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Address used as the subject of problems (`/dirs/d1`).
    pub fn address(&self) -> String {
        format!("/{}", self.path)
    }

    /// Committed property tree.
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// Staged property tree, if a mutation is in flight.
    pub fn staged(&self) -> Option<&Object> {
        self.new_object.as_ref()
    }

    /// Staged tree if present, else committed.
    pub fn current(&self) -> &Object {
        self.new_object.as_ref().unwrap_or(&self.object)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.current().get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_path(&self, path: &PropPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let PathSeg::Key(name) = first else {
            return None;
        };
        let mut value = self.current().get(name)?;
        for seg in rest {
            value = match (seg, value) {
                (PathSeg::Key(k), Value::Map(m)) => m.get(k)?,
                (PathSeg::Index(i), Value::Array(a)) => a.get(*i)?,
                _ => return None,
            };
        }
        Some(value)
    }

    /// Committed epoch.
    pub fn epoch(&self) -> Option<u64> {
        self.object.get("epoch").and_then(Value::as_u64)
    }

    /// Returns `true` if a staged change differs from the committed tree.
    pub fn is_dirty(&self) -> bool {
        matches!(&self.new_object, Some(staged) if *staged != self.object)
    }

    fn require_write(&self) -> RegistryResult<()> {
        match self.access {
            AccessMode::ForWrite => Ok(()),
            AccessMode::ForRead => Err(RegistryError::invariant(format!(
                "write to {} which is not locked for write",
                self.address()
            ))),
        }
    }

    /// Staged tree, created from the committed one on first use.
    fn stage(&mut self) -> &mut Object {
        let object = &self.object;
        self.new_object.get_or_insert_with(|| object.clone())
    }

    fn note_flags(&mut self, name: &str) {
        match name {
            "epoch" => self.epoch_set = true,
            "modifiedat" => self.mod_set = true,
            _ => {}
        }
    }

    // ---------------------------------------------------------------
    // Staging
    // ---------------------------------------------------------------

    /// Stage one top-level property. `Value::Null` deletes it on save.
    pub fn just_set(&mut self, name: &str, value: impl Into<Value>) -> RegistryResult<()> {
        self.require_write()?;
        self.note_flags(name);
        self.stage().insert(name.to_string(), value.into());
        Ok(())
    }

    /// Stage a nested property, creating intermediate maps as needed.
    /// Arrays may only be extended by one element at their end.
    pub fn just_set_path(&mut self, path: &PropPath, value: impl Into<Value>) -> RegistryResult<()> {
        self.require_write()?;
        let Some((PathSeg::Key(top), rest)) = path.segments().split_first() else {
            return Err(Problem::invalid_attribute(path, "path must start with a name").into());
        };
        self.note_flags(top);
        let slot = self.stage().entry(top.clone()).or_insert(Value::Null);
        set_in(slot, rest, value.into()).map_err(|e| Problem::invalid_attribute(path, e))?;
        Ok(())
    }

    /// Stage `obj` as the entity's new contents. System properties of the
    /// current tree are carried over.
    pub fn set_new_object(&mut self, mut obj: Object) -> RegistryResult<()> {
        self.require_write()?;
        for (name, value) in self.current().iter().filter(|(k, _)| is_system_name(k)) {
            obj.entry(name.clone()).or_insert_with(|| value.clone());
        }
        self.note_modifiedat(&obj);
        self.new_object = Some(obj);
        Ok(())
    }

    /// Merge `obj` into the staged tree. Null values delete.
    pub fn patch(&mut self, obj: Object) -> RegistryResult<()> {
        self.require_write()?;
        self.note_modifiedat(&obj);
        let staged = self.stage();
        for (name, value) in obj {
            staged.insert(name, value);
        }
        Ok(())
    }

    /// A caller-supplied `modifiedat` that differs from the committed one
    /// is kept instead of being stamped.
    fn note_modifiedat(&mut self, obj: &Object) {
        if let Some(m) = obj.get("modifiedat") {
            if !m.is_null() && Some(m) != self.object.get("modifiedat") {
                self.mod_set = true;
            }
        }
    }

    /// Stage an unchanged copy so the next save bumps `epoch` and
    /// `modifiedat`.
    pub(crate) fn touch(&mut self) -> RegistryResult<()> {
        self.require_write()?;
        self.stage();
        Ok(())
    }

    /// Drop any staged change.
    pub(crate) fn discard(&mut self) {
        self.new_object = None;
    }

    // ---------------------------------------------------------------
    // Validation and persistence
    // ---------------------------------------------------------------

    /// Validate the staged tree in place. No-op when nothing is staged.
    ///
    /// On failure the staged tree may be partially normalized and the
    /// bookkeeping flags are unchanged.
    pub(crate) fn validate(
        &mut self,
        attrs: &Attributes,
        opts: &ValidateOptions,
        model: &Model,
        now: &Timestamp,
    ) -> Result<(), Problem> {
        let Some(mut staged) = self.new_object.take() else {
            return Ok(());
        };
        let mut epoch_set = self.epoch_set;
        let result = {
            let mut hooks = EntityHooks {
                uid: &self.uid,
                path: &self.path,
                committed: &self.object,
                epoch_set: &mut epoch_set,
                mod_set: self.mod_set,
                now,
                xref_mode: opts.xref_mode,
            };
            validate_object(&mut staged, attrs, &PropPath::root(), opts, model, &mut hooks)
        };
        self.new_object = Some(staged);
        result.map_err(|p| p.or_subject(self.address()))?;
        self.epoch_set = epoch_set;
        Ok(())
    }

    /// Rewrite the entity's property rows from the staged tree.
    ///
    /// Returns `false` if nothing was staged.
    pub(crate) fn save(&mut self, store: &mut dyn StoreTx) -> RegistryResult<bool> {
        let Some(staged) = &self.new_object else {
            return Ok(false);
        };
        self.require_write()?;
        let rows = flatten(self.sid, staged);
        store.delete_props(self.sid)?;
        store.write_props(rows)?;
        if let Some(staged) = self.new_object.take() {
            self.object = strip_object_nulls(&staged);
        }
        debug!(path = %self.path, kind = %self.kind, "saved entity");
        Ok(true)
    }
}

fn set_in(slot: &mut Value, segs: &[PathSeg], value: Value) -> Result<(), String> {
    let Some((seg, rest)) = segs.split_first() else {
        *slot = value;
        return Ok(());
    };
    if slot.is_null() {
        *slot = match seg {
            PathSeg::Key(_) => Value::empty_map(),
            PathSeg::Index(_) => Value::empty_array(),
        };
    }
    match (seg, slot) {
        (PathSeg::Key(k), Value::Map(m)) => set_in(m.entry(k.clone()).or_insert(Value::Null), rest, value),
        (PathSeg::Index(i), Value::Array(a)) if *i <= a.len() => {
            if *i == a.len() {
                a.push(Value::Null);
            }
            set_in(&mut a[*i], rest, value)
        }
        (PathSeg::Index(i), Value::Array(a)) => Err(format!("index {i} is past the end ({})", a.len())),
        (_, other) => Err(format!("cannot descend into a {}", other.kind_name())),
    }
}

// -------------------------------------------------------------------
// Built-in attribute hooks
// -------------------------------------------------------------------

struct EntityHooks<'a> {
    uid: &'a str,
    path: &'a str,
    committed: &'a Object,
    epoch_set: &'a mut bool,
    mod_set: bool,
    now: &'a Timestamp,
    xref_mode: bool,
}

fn present(obj: &Object, name: &str) -> bool {
    matches!(obj.get(name), Some(v) if !v.is_null())
}

impl Hooks for EntityHooks<'_> {
    fn check(&mut self, hook: CheckHook, name: &str, obj: &Object) -> Result<(), Problem> {
        match hook {
            CheckHook::IdMatch => match obj.get(name) {
                Some(Value::String(id)) if id != self.uid => Err(Problem::new(ProblemKind::MismatchedId)
                    .with_arg("name", name)
                    .with_arg("invalid_id", id)
                    .with_arg("expected_id", self.uid)),
                _ => Ok(()),
            },
            CheckHook::Epoch => {
                let Some(current) = self.committed.get(name).and_then(Value::as_u64) else {
                    return Ok(());
                };
                let Some(supplied) = obj.get(name).and_then(Value::as_u64) else {
                    return Ok(());
                };
                // Once bumped, the pre-transaction value is still accepted.
                if supplied == current || (*self.epoch_set && supplied.checked_add(1) == Some(current)) {
                    Ok(())
                } else {
                    Err(Problem::new(ProblemKind::MismatchedEpoch)
                        .with_arg("bad_epoch", supplied)
                        .with_arg("epoch", current))
                }
            }
            CheckHook::Xref => match obj.get(name).and_then(Value::as_str) {
                Some(xref) if !xref.is_empty() => check_xref(self.path, xref),
                _ => Ok(()),
            },
        }
    }

    fn update(&mut self, hook: UpdateHook, name: &str, obj: &mut Object) -> Result<(), Problem> {
        match hook {
            UpdateHook::Id => {
                obj.entry(name.to_string())
                    .or_insert_with(|| Value::from(self.uid));
            }
            UpdateHook::Epoch if self.xref_mode => {
                obj.remove(name);
            }
            UpdateHook::Epoch => {
                let current = self.committed.get(name).and_then(Value::as_u64);
                let supplied = obj.get(name).and_then(Value::as_u64);
                if *self.epoch_set {
                    if let Some(cur) = current {
                        if supplied.map_or(true, |v| v < cur) {
                            obj.insert(name.to_string(), Value::from_u64(cur));
                        }
                    }
                } else {
                    let base = current.or(supplied).unwrap_or(0);
                    let next = base
                        .checked_add(1)
                        .ok_or_else(|| Problem::invalid_attribute(name, format!("{base} cannot be incremented")))?;
                    obj.insert(name.to_string(), Value::from_u64(next));
                    *self.epoch_set = true;
                }
            }
            UpdateHook::CreatedAt | UpdateHook::ModifiedAt if self.xref_mode => {
                obj.remove(name);
            }
            UpdateHook::CreatedAt => {
                if !present(obj, name) {
                    let value = self
                        .committed
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Value::from(self.now.canonical()));
                    obj.insert(name.to_string(), value);
                }
            }
            UpdateHook::ModifiedAt => {
                if !self.mod_set || !present(obj, name) {
                    obj.insert(name.to_string(), Value::from(self.now.canonical()));
                }
            }
            UpdateHook::Xref => {
                if obj.get(name).and_then(Value::as_str) == Some("") {
                    obj.remove(name);
                }
            }
        }
        Ok(())
    }

    fn committed(&self, name: &str) -> Option<Value> {
        self.committed.get(name).cloned()
    }
}

/// An xref must name another Resource of the same type:
/// `/GROUPS/gid/RESOURCES/rid`.
fn check_xref(meta_path: &str, xref: &str) -> Result<(), Problem> {
    let malformed = |detail: &str| {
        Problem::new(ProblemKind::MalformedXref)
            .with_arg("xref", xref)
            .with_detail(detail)
    };
    let own: Vec<&str> = meta_path.split('/').collect();
    let Some(rest) = xref.strip_prefix('/') else {
        return Err(malformed("must start with '/'"));
    };
    let parts: Vec<&str> = rest.split('/').collect();
    let [g, gid, r, rid] = parts.as_slice() else {
        return Err(malformed("must be /GROUPS/gid/RESOURCES/rid"));
    };
    if own.len() < 4 || *g != own[0] || *r != own[2] {
        return Err(malformed(&format!("must reference a /{}/.../{} resource", own[0], own.get(2).unwrap_or(&""))));
    }
    if !is_valid_id(gid) || !is_valid_id(rid) {
        return Err(malformed("contains an invalid id"));
    }
    if *gid == own[1] && *rid == own[3] {
        return Err(malformed("may not reference itself"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xreg_model::builtin::group_attributes;
    use xreg_store::{new_sid, InMemoryStore, Store};
    use xreg_types::value::object_from_json;

    fn entity(access: AccessMode) -> Entity {
        let reg = new_sid();
        Entity::from_row(
            EntityRow {
                sid: new_sid(),
                registry_sid: reg,
                parent_sid: Some(reg),
                kind: EntityType::Group,
                plural: "dirs".into(),
                uid: "d1".into(),
                path: "dirs/d1".into(),
                abstract_path: "dirs".into(),
            },
            "reg",
            Object::new(),
            access,
        )
    }

    fn validate(e: &mut Entity, now: &Timestamp) -> Result<(), Problem> {
        let model = Model::new();
        e.validate(&group_attributes("dir"), &ValidateOptions::entity(), &model, now)
    }

    #[test]
    fn read_entities_reject_writes() {
        let mut e = entity(AccessMode::ForRead);
        let err = e.just_set("name", "x").unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn staging_is_copy_on_write() {
        let mut e = entity(AccessMode::ForWrite);
        e.object.insert("name".into(), Value::from("old"));
        assert!(!e.is_dirty());
        e.just_set("name", "new").unwrap();
        assert_eq!(e.get_str("name"), Some("new"));
        assert_eq!(e.object()["name"], Value::from("old"));
        assert!(e.is_dirty());
        e.discard();
        assert_eq!(e.get_str("name"), Some("old"));
    }

    #[test]
    fn nested_set_creates_maps() {
        let mut e = entity(AccessMode::ForWrite);
        e.just_set_path(&PropPath::from_keys(&["labels", "env"]), "prod").unwrap();
        assert_eq!(
            e.get_path(&PropPath::from_keys(&["labels", "env"])),
            Some(&Value::from("prod"))
        );
        let bad = PropPath::key("labels").with_index(3);
        assert!(e.just_set_path(&bad, 1).is_err());
    }

    #[test]
    fn replace_keeps_system_properties() {
        let mut e = entity(AccessMode::ForWrite);
        e.object.insert("#nextversionid".into(), Value::from(4));
        e.object.insert("name".into(), Value::from("x"));
        e.set_new_object(object_from_json(r#"{"description":"d"}"#).unwrap())
            .unwrap();
        assert_eq!(e.get("#nextversionid"), Some(&Value::from(4)));
        assert!(e.get("name").is_none());
    }

    #[test]
    fn validation_fills_builtins_and_bumps_epoch_once() {
        let now = Timestamp::now();
        let mut e = entity(AccessMode::ForWrite);
        e.just_set("name", "n").unwrap();
        validate(&mut e, &now).unwrap();
        assert_eq!(e.get_str("dirid"), Some("d1"));
        assert_eq!(e.get("epoch").and_then(Value::as_u64), Some(1));
        assert_eq!(e.get_str("createdat"), Some(now.canonical().as_str()));

        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        assert!(e.save(tx.as_mut()).unwrap());
        assert!(!e.save(tx.as_mut()).unwrap());

        e.just_set("name", "again").unwrap();
        validate(&mut e, &now).unwrap();
        e.save(tx.as_mut()).unwrap();
        assert_eq!(e.epoch(), Some(1));
    }

    #[test]
    fn mismatched_epoch_and_id_rejected() {
        let now = Timestamp::now();
        let mut e = entity(AccessMode::ForWrite);
        e.object = object_from_json(r#"{"dirid":"d1","epoch":3}"#).unwrap();

        e.set_new_object(object_from_json(r#"{"epoch":2}"#).unwrap()).unwrap();
        let err = validate(&mut e, &now).unwrap_err();
        assert_eq!(err.kind, ProblemKind::MismatchedEpoch);
        assert_eq!(err.subject, "/dirs/d1");
        assert!(!e.epoch_set);

        e.set_new_object(object_from_json(r#"{"dirid":"d2"}"#).unwrap()).unwrap();
        let err = validate(&mut e, &now).unwrap_err();
        assert_eq!(err.kind, ProblemKind::MismatchedId);

        e.set_new_object(object_from_json(r#"{"epoch":3}"#).unwrap()).unwrap();
        validate(&mut e, &now).unwrap();
        assert_eq!(e.get("epoch").and_then(Value::as_u64), Some(4));
    }

    #[test]
    fn epoch_at_max_is_rejected_not_wrapped() {
        let now = Timestamp::now();
        let mut e = entity(AccessMode::ForWrite);
        e.set_new_object(Object::from([("epoch".to_string(), Value::from_u64(u64::MAX))]))
            .unwrap();
        let err = validate(&mut e, &now).unwrap_err();
        assert_eq!(err.kind, ProblemKind::InvalidAttribute);
        assert_eq!(err.arg("name"), Some("epoch"));
        assert!(!e.epoch_set);

        e.object = Object::from([("epoch".to_string(), Value::from_u64(u64::MAX))]);
        e.set_new_object(Object::from([("epoch".to_string(), Value::from_u64(u64::MAX - 1))]))
            .unwrap();
        let err = validate(&mut e, &now).unwrap_err();
        assert_eq!(err.kind, ProblemKind::MismatchedEpoch);
    }

    #[test]
    fn caller_modifiedat_is_kept() {
        let now = Timestamp::now();
        let mut e = entity(AccessMode::ForWrite);
        e.set_new_object(object_from_json(r#"{"modifiedat":"2020-01-01T00:00:00Z"}"#).unwrap())
            .unwrap();
        validate(&mut e, &now).unwrap();
        assert_eq!(e.get_str("modifiedat"), Some("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn xref_shapes() {
        let meta = "dirs/d1/files/f1/meta";
        assert!(check_xref(meta, "/dirs/d2/files/f9").is_ok());
        for bad in ["dirs/d2/files/f9", "/dirs/d2", "/other/d2/files/f9", "/dirs/d1/files/f1", "/dirs/d 2/files/f"] {
            let err = check_xref(meta, bad).unwrap_err();
            assert_eq!(err.kind, ProblemKind::MalformedXref, "{bad}");
        }
    }
}
