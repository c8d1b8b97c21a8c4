use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;
use xreg_types::{ContentId, EntityType};

use crate::error::{StoreError, StoreResult};
use crate::rows::{EntityRow, PropRow, Sid};
use crate::traits::{Store, StoreTx};

#[derive(Clone, Debug, Default)]
struct Tables {
    entities: HashMap<Sid, EntityRow>,
    props: HashMap<Sid, Vec<PropRow>>,
    models: HashMap<Sid, String>,
    content: HashMap<ContentId, Vec<u8>>,
}

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    /// Write locks: entity sid to owning transaction id.
    locks: Mutex<HashMap<Sid, u64>>,
    next_tx: AtomicU64,
}

/// In-memory, HashMap-based registry store.
///
/// Intended for tests and embedding. Committed tables live behind a
/// `RwLock`; each transaction keeps a private overlay of its writes, so
/// reads see committed data plus the transaction's own changes (read
/// committed). Entity write locks are held until commit or rollback.
///
/// Lookups are linear scans over the merged view.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entities.
    pub fn entity_count(&self) -> usize {
        self.shared.tables.read().expect("lock poisoned").entities.len()
    }

    /// Number of committed document bodies.
    pub fn content_count(&self) -> usize {
        self.shared.tables.read().expect("lock poisoned").content.len()
    }

    /// Number of entity write locks currently held.
    pub fn held_locks(&self) -> usize {
        self.shared.locks.lock().expect("lock poisoned").len()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entities", &self.entity_count())
            .field("content", &self.content_count())
            .finish()
    }
}

impl Store for InMemoryStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemoryTx {
            id,
            shared: Arc::clone(&self.shared),
            overlay: Overlay::default(),
        }))
    }
}

/// Uncommitted writes. `None` marks a deletion.
#[derive(Default)]
struct Overlay {
    entities: HashMap<Sid, Option<EntityRow>>,
    props: HashMap<Sid, Vec<PropRow>>,
    models: HashMap<Sid, Option<String>>,
    content: HashMap<ContentId, Option<Vec<u8>>>,
}

struct InMemoryTx {
    id: u64,
    shared: Arc<Shared>,
    overlay: Overlay,
}

impl InMemoryTx {
    /// Every live entity as seen by this transaction.
    fn entities(&self) -> Vec<EntityRow> {
        let tables = self.shared.tables.read().expect("lock poisoned");
        let mut rows: Vec<EntityRow> = tables
            .entities
            .values()
            .filter(|row| !self.overlay.entities.contains_key(&row.sid))
            .cloned()
            .collect();
        rows.extend(self.overlay.entities.values().flatten().cloned());
        rows
    }

    fn props_of(&self, sid: Sid) -> Vec<PropRow> {
        match self.overlay.props.get(&sid) {
            Some(rows) => rows.clone(),
            None => self
                .shared
                .tables
                .read()
                .expect("lock poisoned")
                .props
                .get(&sid)
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn release_locks(&self) {
        let mut locks = self.shared.locks.lock().expect("lock poisoned");
        locks.retain(|_, owner| *owner != self.id);
    }
}

impl StoreTx for InMemoryTx {
    fn insert_entity(&mut self, row: EntityRow) -> StoreResult<()> {
        if self.find_entity(row.registry_sid, &row.path)?.is_some() {
            return Err(StoreError::DuplicatePath(row.path));
        }
        self.overlay.entities.insert(row.sid, Some(row));
        Ok(())
    }

    fn get_entity(&self, sid: Sid) -> StoreResult<Option<EntityRow>> {
        if let Some(row) = self.overlay.entities.get(&sid) {
            return Ok(row.clone());
        }
        let tables = self.shared.tables.read().expect("lock poisoned");
        Ok(tables.entities.get(&sid).cloned())
    }

    fn find_entity(&self, registry_sid: Sid, path: &str) -> StoreResult<Option<EntityRow>> {
        Ok(self
            .entities()
            .into_iter()
            .find(|row| row.registry_sid == registry_sid && row.path == path))
    }

    fn find_registry(&self, uid: &str) -> StoreResult<Option<EntityRow>> {
        Ok(self
            .entities()
            .into_iter()
            .find(|row| row.kind == EntityType::Registry && row.uid == uid))
    }

    fn children(&self, parent: Sid, plural: &str) -> StoreResult<Vec<EntityRow>> {
        let mut rows: Vec<EntityRow> = self
            .entities()
            .into_iter()
            .filter(|row| row.parent_sid == Some(parent) && row.plural == plural)
            .collect();
        rows.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(rows)
    }

    fn delete_subtree(&mut self, sid: Sid) -> StoreResult<usize> {
        let all = self.entities();
        if !all.iter().any(|row| row.sid == sid) {
            return Ok(0);
        }
        let mut doomed = HashSet::new();
        let mut queue = VecDeque::from([sid]);
        while let Some(current) = queue.pop_front() {
            if !doomed.insert(current) {
                continue;
            }
            for row in all.iter().filter(|r| r.parent_sid == Some(current)) {
                queue.push_back(row.sid);
            }
        }
        for gone in &doomed {
            self.overlay.entities.insert(*gone, None);
            self.overlay.props.insert(*gone, Vec::new());
            self.overlay.models.insert(*gone, None);
        }
        debug!(root = %sid, count = doomed.len(), "deleted entity subtree");
        Ok(doomed.len())
    }

    fn lock_entity(&mut self, sid: Sid) -> StoreResult<Option<EntityRow>> {
        {
            let mut locks = self.shared.locks.lock().expect("lock poisoned");
            match locks.get(&sid) {
                Some(owner) if *owner != self.id => return Err(StoreError::Locked(sid)),
                _ => {
                    locks.insert(sid, self.id);
                }
            }
        }
        self.get_entity(sid)
    }

    fn delete_props(&mut self, sid: Sid) -> StoreResult<()> {
        self.overlay.props.insert(sid, Vec::new());
        Ok(())
    }

    fn write_props(&mut self, rows: Vec<PropRow>) -> StoreResult<()> {
        for row in rows {
            if !self.overlay.props.contains_key(&row.entity_sid) {
                let existing = self.props_of(row.entity_sid);
                self.overlay.props.insert(row.entity_sid, existing);
            }
            self.overlay.props.entry(row.entity_sid).or_default().push(row);
        }
        Ok(())
    }

    fn read_props(&self, sid: Sid) -> StoreResult<Vec<PropRow>> {
        Ok(self.props_of(sid))
    }

    fn save_model(&mut self, registry_sid: Sid, model_json: String) -> StoreResult<()> {
        self.overlay.models.insert(registry_sid, Some(model_json));
        Ok(())
    }

    fn load_model(&self, registry_sid: Sid) -> StoreResult<Option<String>> {
        if let Some(model) = self.overlay.models.get(&registry_sid) {
            return Ok(model.clone());
        }
        let tables = self.shared.tables.read().expect("lock poisoned");
        Ok(tables.models.get(&registry_sid).cloned())
    }

    fn put_content(&mut self, id: ContentId, body: Vec<u8>) -> StoreResult<()> {
        self.overlay.content.insert(id, Some(body));
        Ok(())
    }

    fn get_content(&self, id: &ContentId) -> StoreResult<Option<Vec<u8>>> {
        if let Some(body) = self.overlay.content.get(id) {
            return Ok(body.clone());
        }
        let tables = self.shared.tables.read().expect("lock poisoned");
        Ok(tables.content.get(id).cloned())
    }

    fn delete_content(&mut self, id: &ContentId) -> StoreResult<bool> {
        let existed = self.get_content(id)?.is_some();
        self.overlay.content.insert(*id, None);
        Ok(existed)
    }

    fn count_refs(&self, name: &str, value: &str) -> StoreResult<usize> {
        Ok(self
            .entities()
            .iter()
            .flat_map(|row| self.props_of(row.sid))
            .filter(|prop| prop.name == name && prop.value == value)
            .count())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let overlay = std::mem::take(&mut self.overlay);
        {
            let mut tables = self.shared.tables.write().expect("lock poisoned");
            for (sid, row) in overlay.entities {
                match row {
                    Some(row) => {
                        tables.entities.insert(sid, row);
                    }
                    None => {
                        tables.entities.remove(&sid);
                    }
                }
            }
            for (sid, rows) in overlay.props {
                if rows.is_empty() {
                    tables.props.remove(&sid);
                } else {
                    tables.props.insert(sid, rows);
                }
            }
            for (sid, model) in overlay.models {
                match model {
                    Some(m) => {
                        tables.models.insert(sid, m);
                    }
                    None => {
                        tables.models.remove(&sid);
                    }
                }
            }
            for (id, body) in overlay.content {
                match body {
                    Some(b) => {
                        tables.content.insert(id, b);
                    }
                    None => {
                        tables.content.remove(&id);
                    }
                }
            }
        }
        debug!(tx = self.id, "committed store transaction");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!(tx = self.id, "rolled back store transaction");
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{new_sid, PropType};

    fn registry_row(uid: &str) -> EntityRow {
        let sid = new_sid();
        EntityRow {
            sid,
            registry_sid: sid,
            parent_sid: None,
            kind: EntityType::Registry,
            plural: String::new(),
            uid: uid.into(),
            path: String::new(),
            abstract_path: String::new(),
        }
    }

    fn child_row(reg: &EntityRow, parent: &EntityRow, kind: EntityType, plural: &str, uid: &str) -> EntityRow {
        let path = if parent.path.is_empty() {
            format!("{plural}/{uid}")
        } else {
            format!("{}/{plural}/{uid}", parent.path)
        };
        EntityRow {
            sid: new_sid(),
            registry_sid: reg.sid,
            parent_sid: Some(parent.sid),
            kind,
            plural: plural.into(),
            uid: uid.into(),
            path,
            abstract_path: plural.into(),
        }
    }

    fn prop(sid: Sid, name: &str, value: &str) -> PropRow {
        PropRow {
            entity_sid: sid,
            name: name.into(),
            value: value.into(),
            prop_type: PropType::String,
        }
    }

    #[test]
    fn writes_invisible_until_commit() {
        let store = InMemoryStore::new();
        let reg = registry_row("r");
        let mut tx = store.begin().unwrap();
        tx.insert_entity(reg.clone()).unwrap();
        assert!(tx.find_registry("r").unwrap().is_some());

        let other = store.begin().unwrap();
        assert!(other.find_registry("r").unwrap().is_none());

        tx.commit().unwrap();
        assert!(other.find_registry("r").unwrap().is_some());
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn rollback_discards_writes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.insert_entity(registry_row("r")).unwrap();
        tx.rollback().unwrap();
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn duplicate_paths_rejected() {
        let store = InMemoryStore::new();
        let reg = registry_row("r");
        let mut tx = store.begin().unwrap();
        tx.insert_entity(reg.clone()).unwrap();
        let g = child_row(&reg, &reg, EntityType::Group, "dirs", "d1");
        tx.insert_entity(g.clone()).unwrap();
        let dup = child_row(&reg, &reg, EntityType::Group, "dirs", "d1");
        assert!(matches!(tx.insert_entity(dup), Err(StoreError::DuplicatePath(_))));
    }

    #[test]
    fn delete_subtree_removes_descendants_and_props() {
        let store = InMemoryStore::new();
        let reg = registry_row("r");
        let g = child_row(&reg, &reg, EntityType::Group, "dirs", "d1");
        let r = child_row(&reg, &g, EntityType::Resource, "files", "f1");
        let mut tx = store.begin().unwrap();
        for row in [&reg, &g, &r] {
            tx.insert_entity(row.clone()).unwrap();
        }
        tx.write_props(vec![prop(r.sid, "name", "x")]).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.delete_subtree(g.sid).unwrap(), 2);
        assert!(tx.read_props(r.sid).unwrap().is_empty());
        assert_eq!(tx.children(reg.sid, "dirs").unwrap().len(), 0);
        tx.commit().unwrap();
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn props_append_then_replace() {
        let store = InMemoryStore::new();
        let sid = new_sid();
        let mut tx = store.begin().unwrap();
        tx.write_props(vec![prop(sid, "a", "1")]).unwrap();
        tx.write_props(vec![prop(sid, "b", "2")]).unwrap();
        assert_eq!(tx.read_props(sid).unwrap().len(), 2);
        tx.delete_props(sid).unwrap();
        tx.write_props(vec![prop(sid, "c", "3")]).unwrap();
        assert_eq!(tx.read_props(sid).unwrap(), vec![prop(sid, "c", "3")]);
    }

    #[test]
    fn locks_exclude_other_transactions_until_release() {
        let store = InMemoryStore::new();
        let reg = registry_row("r");
        let mut setup = store.begin().unwrap();
        setup.insert_entity(reg.clone()).unwrap();
        setup.commit().unwrap();

        let mut a = store.begin().unwrap();
        let mut b = store.begin().unwrap();
        assert!(a.lock_entity(reg.sid).unwrap().is_some());
        assert!(a.lock_entity(reg.sid).is_ok());
        assert!(matches!(b.lock_entity(reg.sid), Err(StoreError::Locked(_))));
        a.commit().unwrap();
        assert!(b.lock_entity(reg.sid).unwrap().is_some());
        drop(b);
        assert_eq!(store.held_locks(), 0);
    }

    #[test]
    fn content_and_refs() {
        let store = InMemoryStore::new();
        let id = ContentId::from_bytes(b"body");
        let reg = registry_row("r");
        let mut tx = store.begin().unwrap();
        tx.insert_entity(reg.clone()).unwrap();
        tx.put_content(id, b"body".to_vec()).unwrap();
        tx.write_props(vec![prop(reg.sid, "#contentid", &id.to_hex())]).unwrap();
        assert_eq!(tx.count_refs("#contentid", &id.to_hex()).unwrap(), 1);
        assert_eq!(tx.get_content(&id).unwrap().as_deref(), Some(&b"body"[..]));
        assert!(tx.delete_content(&id).unwrap());
        assert!(tx.get_content(&id).unwrap().is_none());
    }

    #[test]
    fn models_persist_per_registry() {
        let store = InMemoryStore::new();
        let sid = new_sid();
        let mut tx = store.begin().unwrap();
        tx.save_model(sid, "{}".into()).unwrap();
        tx.commit().unwrap();
        let tx = store.begin().unwrap();
        assert_eq!(tx.load_model(sid).unwrap().as_deref(), Some("{}"));
    }
}
