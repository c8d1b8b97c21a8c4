//! Backing-store boundary for xreg.
//!
//! The engine persists every entity as one [`EntityRow`] plus a flat list of
//! [`PropRow`]s, one per scalar leaf of its property tree. Document bodies
//! are stored separately, keyed by [`ContentId`](xreg_types::ContentId), and
//! each registry's model is stored as a JSON text blob.
//!
//! # Storage Backends
//!
//! All backends implement the [`Store`] / [`StoreTx`] traits:
//!
//! - [`InMemoryStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. All reads and writes happen inside a [`StoreTx`].
//! 2. A transaction sees committed data plus its own writes.
//! 3. Commit is all-or-nothing; dropping a transaction discards it.
//! 4. Entity write locks are held until the transaction ends.

pub mod error;
pub mod memory;
pub mod props;
pub mod rows;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use props::{flatten, unflatten};
pub use rows::{new_sid, EntityRow, PropRow, PropType, Sid};
pub use traits::{Store, StoreTx};
