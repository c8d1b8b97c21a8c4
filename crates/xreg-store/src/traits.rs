use xreg_types::ContentId;

use crate::error::StoreResult;
use crate::rows::{EntityRow, PropRow, Sid};

/// A backing store for registry data.
///
/// All access goes through a [`StoreTx`]; the store itself only hands them
/// out. Implementations decide isolation, but must at least guarantee that
/// a transaction sees committed data plus its own writes, and that
/// [`StoreTx::commit`] applies every write or none.
pub trait Store: Send + Sync {
    /// Open a new transaction.
    fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One unit of work against a [`Store`].
///
/// Dropping a transaction without committing discards its writes.
pub trait StoreTx: Send {
    // ---- entity rows ----

    /// Insert a new entity row. Fails if the path is already taken within
    /// the row's registry.
    fn insert_entity(&mut self, row: EntityRow) -> StoreResult<()>;

    /// Fetch an entity by sid.
    fn get_entity(&self, sid: Sid) -> StoreResult<Option<EntityRow>>;

    /// Find an entity by registry and path.
    fn find_entity(&self, registry_sid: Sid, path: &str) -> StoreResult<Option<EntityRow>>;

    /// Find a registry by its caller-visible id.
    fn find_registry(&self, uid: &str) -> StoreResult<Option<EntityRow>>;

    /// Direct children of `parent` in the named collection, sorted by uid.
    fn children(&self, parent: Sid, plural: &str) -> StoreResult<Vec<EntityRow>>;

    /// Delete an entity and everything below it, including property rows.
    /// Returns the number of entities removed.
    fn delete_subtree(&mut self, sid: Sid) -> StoreResult<usize>;

    /// Acquire the write lock on an entity and return its current row.
    ///
    /// Returns `Ok(None)` if the entity no longer exists.
    fn lock_entity(&mut self, sid: Sid) -> StoreResult<Option<EntityRow>>;

    // ---- property rows ----

    /// Delete every property row of an entity.
    fn delete_props(&mut self, sid: Sid) -> StoreResult<()>;

    /// Append property rows.
    fn write_props(&mut self, rows: Vec<PropRow>) -> StoreResult<()>;

    /// All property rows of an entity.
    fn read_props(&self, sid: Sid) -> StoreResult<Vec<PropRow>>;

    // ---- model ----

    fn save_model(&mut self, registry_sid: Sid, model_json: String) -> StoreResult<()>;

    fn load_model(&self, registry_sid: Sid) -> StoreResult<Option<String>>;

    // ---- content ----

    /// Store a document body. Idempotent for identical bodies.
    fn put_content(&mut self, id: ContentId, body: Vec<u8>) -> StoreResult<()>;

    fn get_content(&self, id: &ContentId) -> StoreResult<Option<Vec<u8>>>;

    /// Remove a document body. Returns `true` if it existed.
    fn delete_content(&mut self, id: &ContentId) -> StoreResult<bool>;

    /// Number of property rows named `name` whose value is `value`.
    ///
    /// Used to decide whether shared content is still referenced.
    fn count_refs(&self, name: &str, value: &str) -> StoreResult<usize>;

    // ---- completion ----

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
