//! The engine context and registry-level operations.

use std::sync::Arc;

use tracing::{debug, info, warn};
use xreg_model::builtin::CONTENT_ID;
use xreg_model::names::is_valid_id;
use xreg_model::Model;
use xreg_store::{new_sid, unflatten, EntityRow, InMemoryStore, Sid, Store};
use xreg_types::{AddMode, ContentId, EntityType, Object, Problem, ProblemKind, PropPath};

use crate::config::EngineConfig;
use crate::error::RegistryResult;
use crate::tracker::{StuckTx, TxTicket, TxTracker};
use crate::tx::{user_object, NewEntity, Tx};

/// Explicit engine context: the backing store, configuration and the
/// transaction tracker. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    config: Arc<EngineConfig>,
    tracker: Option<Arc<TxTracker>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let tracker = config.track_transactions.then(|| Arc::new(TxTracker::new()));
        Self {
            store,
            config: Arc::new(config),
            tracker,
        }
    }

    /// An engine over a fresh [`InMemoryStore`] with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), EngineConfig::default())
    }

    /// Share `tracker` instead of the engine's own.
    pub fn with_tracker(mut self, tracker: Arc<TxTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn tracker(&self) -> Option<&TxTracker> {
        self.tracker.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open transactions older than the configured stuck age.
    pub fn report_stuck(&self) -> Vec<StuckTx> {
        match &self.tracker {
            Some(t) => t.stuck(self.config.stuck_after()),
            None => Vec::new(),
        }
    }

    fn begin(&self, registry_uid: &str, registry_sid: Sid, model: Model) -> RegistryResult<Tx> {
        let ticket: Option<TxTicket> = match &self.tracker {
            Some(t) => Some(t.register(registry_uid, self.config.forbid_nested_transactions)?),
            None => None,
        };
        let store = match self.store.begin() {
            Ok(store) => store,
            Err(e) => {
                if let (Some(t), Some(ticket)) = (&self.tracker, ticket) {
                    t.deregister(ticket);
                }
                return Err(e.into());
            }
        };
        Ok(Tx::new(
            store,
            registry_sid,
            registry_uid,
            model,
            Arc::clone(&self.config),
            self.tracker.clone(),
            ticket,
        ))
    }

    /// Create a registry governed by `model` and return the transaction
    /// that created it. Nothing is visible until it commits.
    pub fn create_registry(&self, uid: &str, model: Model) -> RegistryResult<Tx> {
        if !is_valid_id(uid) {
            return Err(Problem::invalid_attribute("registryid", format!("invalid id {uid:?}")).into());
        }
        model.verify()?;
        let mut tx = self.begin(uid, new_sid(), model)?;
        match tx.init_registry() {
            Ok(()) => {
                info!(registry = uid, "created registry");
                Ok(tx)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    /// Open an existing registry.
    pub fn open(&self, uid: &str) -> RegistryResult<Tx> {
        let mut tx = self.begin(uid, Sid::nil(), Model::new())?;
        match tx.bind_registry() {
            Ok(()) => Ok(tx),
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    /// Delete a registry with everything in it, in its own transaction.
    pub fn delete_registry(&self, uid: &str) -> RegistryResult<()> {
        let mut tx = self.open(uid)?;
        let root = tx.entity_row("")?;
        let content = tx.content_under(&root)?;
        tx.delete_entity("")?;
        tx.release_content(content)?;
        tx.commit()?;
        info!(registry = uid, "deleted registry");
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("tracking", &self.tracker.is_some())
            .finish()
    }
}

impl Tx {
    fn init_registry(&mut self) -> RegistryResult<()> {
        let uid = self.registry_uid().to_string();
        if self.store_ref()?.find_registry(&uid)?.is_some() {
            return Err(Problem::new(ProblemKind::AlreadyExists)
                .with_subject(format!("/{uid}"))
                .into());
        }
        self.create_entity(NewEntity {
            kind: EntityType::Registry,
            parent_sid: None,
            plural: String::new(),
            uid,
            path: String::new(),
            abstract_path: String::new(),
            object: Object::new(),
        })?;
        self.save_entity("")?;
        self.model.mark_changed();
        self.save_model()
    }

    fn bind_registry(&mut self) -> RegistryResult<()> {
        let uid = self.registry_uid().to_string();
        let store = self.store_ref()?;
        let row = store
            .find_registry(&uid)?
            .ok_or_else(|| Problem::not_found(format!("/{uid}")))?;
        let text = store
            .load_model(row.sid)?
            .ok_or_else(|| Problem::model_error(format!("registry {uid:?} has no model")))?;
        let mut model = Model::from_json(&text)?;
        model.mark_saved();
        self.registry_sid = row.sid;
        self.model = model;
        debug!(registry = %uid, "opened registry");
        Ok(())
    }

    /// The registry's own properties.
    pub fn registry(&mut self) -> RegistryResult<Object> {
        Ok(self.get("")?.unwrap_or_default())
    }

    /// Update the registry's own properties.
    pub fn update_registry(&mut self, obj: Object, mode: AddMode) -> RegistryResult<()> {
        let obj = user_object(obj);
        let entity = self.entity_mut("")?;
        if mode.is_merge() {
            entity.patch(obj)?;
        } else {
            entity.set_new_object(obj)?;
        }
        self.save_entity("")
    }

    pub(crate) fn entity_row(&mut self, path: &str) -> RegistryResult<EntityRow> {
        self.entity(path)?
            .map(|e| e.to_row())
            .ok_or_else(|| Problem::not_found(format!("/{path}")).into())
    }

    /// Every Version row at or below `row`.
    fn version_rows_under(&self, row: &EntityRow) -> RegistryResult<Vec<EntityRow>> {
        let store = self.store_ref()?;
        let mut out = Vec::new();
        match row.kind {
            EntityType::Registry => {
                for group_type in self.model.groups.keys() {
                    for child in store.children(row.sid, group_type)? {
                        out.extend(self.version_rows_under(&child)?);
                    }
                }
            }
            EntityType::Group => {
                if let Some(gm) = self.model.find_group(&row.plural) {
                    for resource_type in gm.resources.keys() {
                        for child in store.children(row.sid, resource_type)? {
                            out.extend(self.version_rows_under(&child)?);
                        }
                    }
                }
            }
            EntityType::Resource => out.extend(store.children(row.sid, "versions")?),
            EntityType::Version => out.push(row.clone()),
            EntityType::Meta => {}
        }
        Ok(out)
    }

    /// Content ids referenced by Versions at or below `row`.
    pub(crate) fn content_under(&self, row: &EntityRow) -> RegistryResult<Vec<String>> {
        let store = self.store_ref()?;
        let mut ids = Vec::new();
        for version in self.version_rows_under(row)? {
            let obj = unflatten(&store.read_props(version.sid)?)?;
            if let Some(id) = obj.get(CONTENT_ID).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Drop document bodies no longer referenced by any Version.
    pub(crate) fn release_content(&mut self, ids: Vec<String>) -> RegistryResult<()> {
        let name = PropPath::key(CONTENT_ID).to_storage();
        let store = self.store_mut()?;
        for hex in ids {
            if store.count_refs(&name, &hex)? > 0 {
                continue;
            }
            match ContentId::from_hex(&hex) {
                Ok(id) => {
                    store.delete_content(&id)?;
                    debug!(content = %hex, "released document body");
                }
                Err(e) => warn!(content = %hex, error = %e, "skipping malformed content id"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xreg_model::GroupModel;
    use xreg_types::Value;

    fn model() -> Model {
        let mut m = Model::new();
        m.add_group(GroupModel::new("dirs", "dir"));
        m
    }

    #[test]
    fn create_commit_open() {
        let engine = Engine::in_memory();
        let mut tx = engine.create_registry("reg", model()).unwrap();
        let reg = tx.registry().unwrap();
        assert_eq!(reg["registryid"], Value::from("reg"));
        assert_eq!(reg["specversion"], Value::from("1.0"));
        assert_eq!(reg["epoch"], Value::from(1i64));
        tx.commit().unwrap();

        let mut tx = engine.open("reg").unwrap();
        assert!(tx.model().find_group("dirs").is_some());
        assert!(!tx.model().is_changed());
        assert_eq!(tx.registry().unwrap()["epoch"], Value::from(1i64));
        tx.rollback().unwrap();
    }

    #[test]
    fn duplicate_and_missing_registries() {
        let engine = Engine::in_memory();
        engine.create_registry("reg", model()).unwrap().commit().unwrap();

        let err = engine.create_registry("reg", model()).unwrap_err();
        assert_eq!(err.problem().map(|p| p.kind), Some(ProblemKind::AlreadyExists));

        let err = engine.open("nope").unwrap_err();
        assert_eq!(err.problem().map(|p| p.kind), Some(ProblemKind::NotFound));

        let err = engine.create_registry("bad id", model()).unwrap_err();
        assert_eq!(err.problem().map(|p| p.kind), Some(ProblemKind::InvalidAttribute));
        assert_eq!(engine.tracker().map(|t| t.active()), Some(0));
    }

    #[test]
    fn update_registry_bumps_epoch_once() {
        let engine = Engine::in_memory();
        engine.create_registry("reg", model()).unwrap().commit().unwrap();

        let mut tx = engine.open("reg").unwrap();
        let mut obj = Object::new();
        obj.insert("name".into(), Value::from("first"));
        tx.update_registry(obj, AddMode::Patch).unwrap();
        let mut obj = Object::new();
        obj.insert("description".into(), Value::from("second"));
        tx.update_registry(obj, AddMode::Patch).unwrap();
        let reg = tx.registry().unwrap();
        assert_eq!(reg["epoch"], Value::from(2i64));
        assert_eq!(reg["name"], Value::from("first"));
        tx.commit().unwrap();
    }

    #[test]
    fn specversion_cannot_be_overwritten() {
        let engine = Engine::in_memory();
        engine.create_registry("reg", model()).unwrap().commit().unwrap();

        let mut tx = engine.open("reg").unwrap();
        let mut obj = Object::new();
        obj.insert("specversion".into(), Value::from("2.0"));
        let err = tx.update_registry(obj, AddMode::Patch).unwrap_err();
        let problem = err.problem().unwrap();
        assert_eq!(problem.kind, ProblemKind::InvalidAttribute);
        assert_eq!(problem.arg("name"), Some("specversion"));
        tx.rollback().unwrap();

        let mut tx = engine.open("reg").unwrap();
        tx.update_registry(Object::new(), AddMode::Update).unwrap();
        assert_eq!(tx.registry().unwrap()["specversion"], Value::from("1.0"));
        tx.commit().unwrap();
    }

    #[test]
    fn nested_transactions_rejected_when_forbidden() {
        let config = EngineConfig {
            forbid_nested_transactions: true,
            ..EngineConfig::default()
        };
        let engine = Engine::new(Arc::new(InMemoryStore::new()), config);
        engine.create_registry("reg", model()).unwrap().commit().unwrap();

        let _outer = engine.open("reg").unwrap();
        let err = engine.open("reg").unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn delete_registry_removes_everything() {
        let store = Arc::new(InMemoryStore::new());
        let engine = Engine::new(store.clone(), EngineConfig::default());
        let mut tx = engine.create_registry("reg", model()).unwrap();
        tx.upsert_group("dirs", "d1", Object::new(), AddMode::Add).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.entity_count(), 2);

        engine.delete_registry("reg").unwrap();
        assert_eq!(store.entity_count(), 0);
        assert!(engine.open("reg").is_err());
    }

    #[test]
    fn stuck_report_uses_config_age() {
        let config = EngineConfig {
            stuck_transaction_secs: 0,
            forbid_nested_transactions: false,
            ..EngineConfig::default()
        };
        let engine = Engine::new(Arc::new(InMemoryStore::new()), config);
        let tx = engine.create_registry("reg", model()).unwrap();
        let stuck = engine.report_stuck();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].registry, "reg");
        drop(tx);
        assert!(engine.report_stuck().is_empty());
    }
}
