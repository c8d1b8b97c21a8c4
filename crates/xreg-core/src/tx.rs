//! Transactions and the per-transaction entity cache.
//!
//! A [`Tx`] binds one store transaction to one registry. Every entity the
//! transaction touches is loaded once into its cache, keyed by
//! (registry id, path), so all mutations of an entity within the
//! transaction go through a single in-memory instance.
//!
//! # Design Rules
//!
//! 1. At most one [`Entity`] per (registry, path) per transaction.
//! 2. An entity with an unsaved staged change may not leave the cache.
//! 3. `commit` saves every staged entity, then commits the store.
//! 4. All timestamps stamped in a transaction share its start time.
//! 5. A dropped, uncommitted transaction rolls back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use xreg_model::{Attributes, GroupModel, Model, ResourceModel};
use xreg_schema::ValidateOptions;
use xreg_store::{new_sid, unflatten, EntityRow, Sid, StoreTx};
use xreg_types::{is_system_name, AccessMode, EntityType, Object, Problem, ProblemKind, Timestamp, Value};

use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::error::{RegistryError, RegistryResult};
use crate::tracker::{TxTicket, TxTracker};

/// Cache key: (registry id, entity path).
pub type CacheKey = (String, String);

/// Drop engine-private properties from caller-supplied input.
pub(crate) fn user_object(mut obj: Object) -> Object {
    obj.retain(|k, _| !is_system_name(k));
    obj
}

/// Caller-visible copy of an entity's properties.
pub(crate) fn public_view(obj: &Object) -> Object {
    obj.iter()
        .filter(|(k, v)| !is_system_name(k) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Everything needed to create a new entity row.
pub(crate) struct NewEntity {
    pub kind: EntityType,
    pub parent_sid: Option<Sid>,
    pub plural: String,
    pub uid: String,
    pub path: String,
    pub abstract_path: String,
    pub object: Object,
}

/// One unit of work against one registry.
pub struct Tx {
    store: Option<Box<dyn StoreTx>>,
    pub(crate) registry_sid: Sid,
    registry_uid: String,
    pub(crate) model: Model,
    pub(crate) config: Arc<EngineConfig>,
    tracker: Option<Arc<TxTracker>>,
    ticket: Option<TxTicket>,
    cache: HashMap<CacheKey, Entity>,
    /// Entities whose epoch this transaction already bumped, kept across
    /// cache evictions.
    bumped: HashSet<Sid>,
    now: Timestamp,
    next_seq: u64,
}

impl Tx {
    pub(crate) fn new(
        store: Box<dyn StoreTx>,
        registry_sid: Sid,
        registry_uid: &str,
        model: Model,
        config: Arc<EngineConfig>,
        tracker: Option<Arc<TxTracker>>,
        ticket: Option<TxTicket>,
    ) -> Self {
        Self {
            store: Some(store),
            registry_sid,
            registry_uid: registry_uid.to_string(),
            model,
            config,
            tracker,
            ticket,
            cache: HashMap::new(),
            bumped: HashSet::new(),
            now: Timestamp::now(),
            next_seq: 0,
        }
    }

    pub fn registry_uid(&self) -> &str {
        &self.registry_uid
    }

    /// Time stamped on every entity this transaction writes.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable access to the model. The model is marked changed and must
    /// be saved with [`Tx::save_model`] before the transaction's results
    /// are used.
    pub fn model_mut(&mut self) -> &mut Model {
        self.model.mark_changed();
        &mut self.model
    }

    /// Verify and persist the model.
    pub fn save_model(&mut self) -> RegistryResult<()> {
        self.model.verify()?;
        let json = self.model.to_json()?;
        let registry_sid = self.registry_sid;
        self.store_mut()?.save_model(registry_sid, json)?;
        self.model.mark_saved();
        debug!(registry = %self.registry_uid, "saved model");
        Ok(())
    }

    /// Replace the model with `model` and persist it.
    pub fn update_model(&mut self, model: Model) -> RegistryResult<()> {
        model.verify()?;
        self.model.replace_with(model);
        self.save_model()
    }

    pub(crate) fn store_ref(&self) -> RegistryResult<&dyn StoreTx> {
        self.store
            .as_deref()
            .ok_or_else(|| RegistryError::invariant("transaction is closed"))
    }

    pub(crate) fn store_mut(&mut self) -> RegistryResult<&mut (dyn StoreTx + 'static)> {
        self.store
            .as_deref_mut()
            .ok_or_else(|| RegistryError::invariant("transaction is closed"))
    }

    pub(crate) fn group_model(&self, group_type: &str) -> Result<&GroupModel, Problem> {
        self.model.find_group(group_type).ok_or_else(|| {
            Problem::new(ProblemKind::UnknownGroupType).with_arg("name", group_type)
        })
    }

    pub(crate) fn resource_model(&self, group_type: &str, resource_type: &str) -> Result<&ResourceModel, Problem> {
        self.group_model(group_type)?
            .find_resource(resource_type)
            .ok_or_else(|| {
                Problem::new(ProblemKind::UnknownResourceType)
                    .with_arg("group", group_type)
                    .with_arg("name", resource_type)
            })
    }

    fn key(&self, path: &str) -> CacheKey {
        (self.registry_uid.clone(), path.to_string())
    }

    // ---------------------------------------------------------------
    // Cache
    // ---------------------------------------------------------------

    /// Add an entity to the cache. A second instance for the same path is
    /// an invariant violation.
    pub fn add_to_cache(&mut self, entity: Entity) -> RegistryResult<()> {
        let key = (entity.registry_uid.clone(), entity.path.clone());
        if self.cache.contains_key(&key) {
            return Err(RegistryError::invariant(format!(
                "second instance of {} in one transaction",
                entity.address()
            )));
        }
        self.cache.insert(key, entity);
        Ok(())
    }

    /// Evict an entity. Evicting one with unsaved changes is an invariant
    /// violation and leaves it cached.
    pub fn remove_from_cache(&mut self, path: &str) -> RegistryResult<Option<Entity>> {
        let key = self.key(path);
        if let Some(entity) = self.cache.get(&key) {
            if entity.is_dirty() {
                return Err(RegistryError::invariant(format!(
                    "evicting {} with unsaved changes",
                    entity.address()
                )));
            }
        }
        let removed = self.cache.remove(&key);
        if let Some(entity) = &removed {
            if entity.epoch_set {
                self.bumped.insert(entity.sid);
            }
            debug!(path, "evicted entity");
        }
        Ok(removed)
    }

    /// The cached instance for `path`, without touching the store.
    pub fn cached(&self, path: &str) -> Option<&Entity> {
        self.cache.get(&self.key(path))
    }

    pub(crate) fn cached_mut(&mut self, path: &str) -> RegistryResult<&mut Entity> {
        let key = self.key(path);
        self.cache
            .get_mut(&key)
            .ok_or_else(|| RegistryError::invariant(format!("/{path} is not cached")))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Load `path` into the cache if needed. Returns `false` if no such
    /// entity exists.
    pub(crate) fn load(&mut self, path: &str) -> RegistryResult<bool> {
        let key = self.key(path);
        if self.cache.contains_key(&key) {
            return Ok(true);
        }
        let store = self.store_ref()?;
        let Some(row) = store.find_entity(self.registry_sid, path)? else {
            return Ok(false);
        };
        let object = unflatten(&store.read_props(row.sid)?)?;
        let mut entity = Entity::from_row(row, &self.registry_uid, object, AccessMode::ForRead);
        entity.epoch_set = self.bumped.contains(&entity.sid);
        self.cache.insert(key, entity);
        Ok(true)
    }

    /// Fetch an entity for reading.
    pub fn entity(&mut self, path: &str) -> RegistryResult<Option<&Entity>> {
        if !self.load(path)? {
            return Ok(None);
        }
        Ok(self.cached(path))
    }

    /// Lock an entity for write and return it. Fails with `not_found` if it
    /// does not exist.
    pub fn entity_mut(&mut self, path: &str) -> RegistryResult<&mut Entity> {
        if !self.lock(path)? {
            return Err(Problem::not_found(format!("/{path}")).into());
        }
        self.cached_mut(path)
    }

    /// Acquire the write lock on `path`, re-reading its committed state.
    /// Returns `false` if it does not exist.
    pub fn lock(&mut self, path: &str) -> RegistryResult<bool> {
        if !self.load(path)? {
            return Ok(false);
        }
        let key = self.key(path);
        let (sid, access) = match self.cache.get(&key) {
            Some(e) => (e.sid, e.access),
            None => return Ok(false),
        };
        if access == AccessMode::ForWrite {
            return Ok(true);
        }
        let store = self.store_mut()?;
        let Some(row) = store.lock_entity(sid)? else {
            self.cache.remove(&key);
            return Ok(false);
        };
        let object = unflatten(&store.read_props(row.sid)?)?;
        let entity = self.cached_mut(path)?;
        entity.object = object;
        entity.access = AccessMode::ForWrite;
        Ok(true)
    }

    /// Re-read an entity's committed state from the store, dropping any
    /// staged change.
    pub fn refresh(&mut self, path: &str) -> RegistryResult<()> {
        let key = self.key(path);
        let Some(sid) = self.cache.get(&key).map(|e| e.sid) else {
            return Ok(());
        };
        let object = unflatten(&self.store_ref()?.read_props(sid)?)?;
        let entity = self.cached_mut(path)?;
        entity.object = object;
        entity.discard();
        Ok(())
    }

    /// Insert a new entity row and cache it, locked, with `object` staged.
    pub(crate) fn create_entity(&mut self, new: NewEntity) -> RegistryResult<()> {
        let sid = if new.kind == EntityType::Registry {
            self.registry_sid
        } else {
            new_sid()
        };
        self.next_seq += 1;
        let row = EntityRow {
            sid,
            registry_sid: self.registry_sid,
            parent_sid: new.parent_sid,
            kind: new.kind,
            plural: new.plural,
            uid: new.uid,
            path: new.path,
            abstract_path: new.abstract_path,
        };
        let store = self.store_mut()?;
        store.insert_entity(row.clone())?;
        store.lock_entity(sid)?;
        let mut entity = Entity::from_row(row, &self.registry_uid, Object::new(), AccessMode::ForWrite);
        entity.new_object = Some(new.object);
        entity.seq = self.next_seq;
        debug!(path = %entity.path, kind = %entity.kind, "created entity");
        self.add_to_cache(entity)
    }

    // ---------------------------------------------------------------
    // Validation and persistence
    // ---------------------------------------------------------------

    /// Attributes and options for validating `entity`.
    fn level_attributes(&self, entity: &Entity) -> RegistryResult<(Attributes, ValidateOptions)> {
        let parts: Vec<&str> = entity.abstract_path.split('/').filter(|s| !s.is_empty()).collect();
        let attrs = match parts.as_slice() {
            [] => self.model.registry_attributes(&self.config.spec_version),
            [g] => self.group_model(g)?.group_attributes(),
            [g, r] => self.resource_model(g, r)?.resource_attributes(),
            [g, r, "meta"] => self.resource_model(g, r)?.meta_attributes(),
            [g, r, "versions"] => self.resource_model(g, r)?.version_attributes(),
            _ => {
                return Err(RegistryError::invariant(format!(
                    "no attribute set for {}",
                    entity.abstract_path
                )))
            }
        };
        let xref_mode = entity.kind == EntityType::Meta
            && entity
                .get("xref")
                .and_then(Value::as_str)
                .is_some_and(|x| !x.is_empty());
        Ok((attrs, ValidateOptions::entity().with_xref(xref_mode)))
    }

    /// Validate and save the staged change of a cached entity. On a
    /// validation problem the staged change is discarded.
    pub(crate) fn save_entity(&mut self, path: &str) -> RegistryResult<()> {
        let key = self.key(path);
        let (attrs, opts) = match self.cache.get(&key) {
            Some(e) if e.new_object.is_none() => return Ok(()),
            Some(e) => self.level_attributes(e)?,
            None => return Err(RegistryError::invariant(format!("save of uncached /{path}"))),
        };
        let Tx {
            store,
            cache,
            model,
            now,
            ..
        } = self;
        let store = store
            .as_deref_mut()
            .ok_or_else(|| RegistryError::invariant("transaction is closed"))?;
        let entity = cache
            .get_mut(&key)
            .ok_or_else(|| RegistryError::invariant(format!("save of uncached /{path}")))?;
        if let Err(problem) = entity.validate(&attrs, &opts, model, now) {
            entity.discard();
            return Err(problem.into());
        }
        entity.save(store)?;
        Ok(())
    }

    /// Save a just-created entity; if it fails validation the row is
    /// removed again.
    pub(crate) fn save_new(&mut self, path: &str) -> RegistryResult<()> {
        match self.save_entity(path) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.delete_entity(path)?;
                Err(err)
            }
        }
    }

    /// Stage, validate and save one property. On failure the entity is
    /// left as it was.
    pub fn set_save(&mut self, path: &str, name: &str, value: impl Into<Value>) -> RegistryResult<()> {
        let entity = self.entity_mut(path)?;
        let (epoch_set, mod_set) = (entity.epoch_set, entity.mod_set);
        entity.just_set(name, value)?;
        match self.save_entity(path) {
            Ok(()) => Ok(()),
            Err(err) => {
                let entity = self.cached_mut(path)?;
                entity.discard();
                entity.epoch_set = epoch_set;
                entity.mod_set = mod_set;
                Err(err)
            }
        }
    }

    /// Bump `epoch` and `modifiedat` of an entity without other change.
    pub(crate) fn touch(&mut self, path: &str) -> RegistryResult<()> {
        self.entity_mut(path)?.touch()?;
        self.save_entity(path)
    }

    /// Delete an entity and everything below it, evicting them from the
    /// cache. The entity's own staged change is discarded.
    pub(crate) fn delete_entity(&mut self, path: &str) -> RegistryResult<usize> {
        let sid = self.entity_mut(path)?.sid;
        self.cached_mut(path)?.discard();
        let prefix = format!("{path}/");
        let doomed: Vec<String> = self
            .cache
            .keys()
            .filter(|(_, p)| path.is_empty() || p == path || p.starts_with(&prefix))
            .map(|(_, p)| p.clone())
            .collect();
        for p in &doomed {
            let key = self.key(p);
            self.cache.remove(&key);
        }
        let count = self.store_mut()?.delete_subtree(sid)?;
        debug!(path, count, "deleted entity subtree");
        Ok(count)
    }

    /// Caller-visible properties of the entity at `path`.
    pub fn get(&mut self, path: &str) -> RegistryResult<Option<Object>> {
        Ok(self.entity(path)?.map(|e| public_view(e.current())))
    }

    // ---------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------

    /// Fail if any cached entity or the model has unsaved changes.
    pub fn validate(&self) -> RegistryResult<()> {
        if let Some(entity) = self.cache.values().find(|e| e.is_dirty()) {
            return Err(RegistryError::invariant(format!(
                "{} has unsaved changes",
                entity.address()
            )));
        }
        if self.model.is_changed() {
            return Err(RegistryError::invariant("model has unsaved changes"));
        }
        Ok(())
    }

    /// Save every staged entity and the model, then commit.
    pub fn commit(&mut self) -> RegistryResult<()> {
        if self.store.is_none() {
            return Err(RegistryError::invariant("commit of a closed transaction"));
        }
        let mut staged: Vec<String> = self
            .cache
            .values()
            .filter(|e| e.new_object.is_some())
            .map(|e| e.path.clone())
            .collect();
        staged.sort();
        for path in staged {
            self.save_entity(&path)?;
        }
        if self.model.is_changed() {
            self.save_model()?;
        }
        if let Some(store) = self.store.take() {
            store.commit()?;
        }
        self.close();
        info!(registry = %self.registry_uid, "committed transaction");
        Ok(())
    }

    /// Discard everything. No-op on a closed transaction.
    pub fn rollback(&mut self) -> RegistryResult<()> {
        let Some(store) = self.store.take() else {
            return Ok(());
        };
        let result = store.rollback();
        self.close();
        debug!(registry = %self.registry_uid, "rolled back transaction");
        Ok(result?)
    }

    fn close(&mut self) {
        if let (Some(tracker), Some(ticket)) = (&self.tracker, self.ticket.take()) {
            tracker.deregister(ticket);
        }
        self.cache.clear();
        self.bumped.clear();
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            warn!(registry = %self.registry_uid, "transaction dropped without commit; rolling back");
            if let Err(e) = store.rollback() {
                warn!(error = %e, "rollback failed");
            }
        }
        self.close();
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("registry", &self.registry_uid)
            .field("open", &self.is_open())
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Engine;
    use xreg_model::GroupModel;
    use xreg_types::value::object_from_json;

    fn model() -> Model {
        let mut m = Model::new();
        m.add_group(GroupModel::new("dirs", "dir"));
        m
    }

    fn engine() -> Engine {
        Engine::in_memory()
    }

    #[test]
    fn single_instance_per_path() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.upsert_group("dirs", "d1", Object::new(), xreg_types::AddMode::Add).unwrap();
        let copy = tx.cached("dirs/d1").unwrap().clone();
        let err = tx.add_to_cache(copy).unwrap_err();
        assert!(err.is_invariant());
        tx.commit().unwrap();
    }

    #[test]
    fn dirty_entity_cannot_be_evicted() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.upsert_group("dirs", "d1", Object::new(), xreg_types::AddMode::Add).unwrap();
        tx.entity_mut("dirs/d1").unwrap().just_set("name", "staged").unwrap();

        let err = tx.remove_from_cache("dirs/d1").unwrap_err();
        assert!(err.is_invariant());
        assert!(tx.cached("dirs/d1").is_some());
        assert!(tx.validate().unwrap_err().is_invariant());

        tx.save_entity("dirs/d1").unwrap();
        tx.validate().unwrap();
        assert!(tx.remove_from_cache("dirs/d1").unwrap().is_some());
        tx.commit().unwrap();
    }

    #[test]
    fn eviction_keeps_epoch_bumped_once() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.upsert_group("dirs", "d1", Object::new(), xreg_types::AddMode::Add).unwrap();
        tx.commit().unwrap();

        let mut tx = engine.open("reg").unwrap();
        let patch = |name: &str| object_from_json(&format!(r#"{{"name":"{name}"}}"#)).unwrap();
        tx.upsert_group("dirs", "d1", patch("a"), xreg_types::AddMode::Patch).unwrap();
        assert!(tx.remove_from_cache("dirs/d1").unwrap().is_some());
        tx.upsert_group("dirs", "d1", patch("b"), xreg_types::AddMode::Patch).unwrap();
        assert_eq!(tx.get("dirs/d1").unwrap().unwrap()["epoch"], Value::from(2i64));
        tx.commit().unwrap();

        let mut tx = engine.open("reg").unwrap();
        let g = tx.get("dirs/d1").unwrap().unwrap();
        assert_eq!(g["epoch"], Value::from(2i64));
        assert_eq!(g["name"], Value::from("b"));
    }

    #[test]
    fn unsaved_model_fails_validate() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.model_mut().add_group(GroupModel::new("schemagroups", "schemagroup"));
        assert!(tx.validate().unwrap_err().is_invariant());
        tx.save_model().unwrap();
        tx.validate().unwrap();
        tx.commit().unwrap();

        let tx = engine.open("reg").unwrap();
        assert!(tx.model().find_group("schemagroups").is_some());
    }

    #[test]
    fn set_save_failure_restores_entity() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.upsert_group("dirs", "d1", object_from_json(r#"{"name":"n"}"#).unwrap(), xreg_types::AddMode::Add)
            .unwrap();
        let err = tx.set_save("dirs/d1", "documentation", 12).unwrap_err();
        assert_eq!(err.problem().map(|p| p.kind), Some(ProblemKind::InvalidAttribute));
        let e = tx.cached("dirs/d1").unwrap();
        assert!(e.staged().is_none());
        assert!(e.get("documentation").is_none());

        tx.set_save("dirs/d1", "description", "ok").unwrap();
        assert_eq!(tx.cached("dirs/d1").unwrap().get_str("description"), Some("ok"));
        tx.commit().unwrap();
    }

    #[test]
    fn rollback_is_idempotent_and_closes() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.rollback().unwrap();
        tx.rollback().unwrap();
        assert!(!tx.is_open());
        assert!(tx.commit().unwrap_err().is_invariant());
        assert_eq!(engine.tracker().map(|t| t.active()), Some(0));
        assert!(engine.open("reg").is_err());
    }

    #[test]
    fn drop_rolls_back() {
        let engine = engine();
        {
            let mut tx = engine.create_registry("reg", model()).unwrap();
            tx.upsert_group("dirs", "d1", Object::new(), xreg_types::AddMode::Add).unwrap();
        }
        assert_eq!(engine.tracker().map(|t| t.active()), Some(0));
        assert!(engine.open("reg").is_err());
    }

    #[test]
    fn system_properties_hidden_from_reads() {
        let engine = engine();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.upsert_group(
            "dirs",
            "d1",
            object_from_json(r##"{"name":"n","#secret":1}"##).unwrap(),
            xreg_types::AddMode::Add,
        )
        .unwrap();
        let obj = tx.get("dirs/d1").unwrap().unwrap();
        assert!(obj.keys().all(|k| !k.starts_with('#')));
        assert_eq!(obj["dirid"], Value::from("d1"));
        tx.commit().unwrap();
    }
}
