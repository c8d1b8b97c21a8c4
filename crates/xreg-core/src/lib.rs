//! Entity engine for xreg.
//!
//! This crate turns the model, schema and store layers into a working
//! registry. It provides:
//! - [`Entity`], the staged-mutation record shared by all five entity kinds
//! - [`Tx`], a transaction with its per-transaction entity cache
//! - [`TxTracker`], diagnostics for leaked, stuck and nested transactions
//! - the Version Ancestry Engine ([`ancestry`]) with its two
//!   [`VersionMode`]s
//! - Registry, Group, Resource, Meta and Version operations on [`Tx`]
//! - [`Engine`], the explicit context tying a store, configuration and
//!   tracker together
//!
//! # Design Rules
//!
//! 1. Every read and write happens inside a [`Tx`].
//! 2. An entity's `epoch` rises by exactly one per transaction that changes it.
//! 3. After every Resource mutation the Resource is validated as a whole.
//! 4. User errors are [`Problem`](xreg_types::Problem)s; broken engine
//!   contracts are [`RegistryError::Invariant`] and are never healed.

pub mod ancestry;
pub mod config;
pub mod entity;
pub mod error;
pub mod group;
pub mod registry;
pub mod resource;
pub mod tracker;
pub mod tx;
pub mod version;

pub use ancestry::{
    by_age, version_mode, AncestryGraph, CreatedAtMode, ManualMode, Position, Reparent, VersionInfo,
    VersionMode, TBD,
};
pub use config::EngineConfig;
pub use entity::Entity;
pub use error::{RegistryError, RegistryResult};
pub use group::group_path;
pub use registry::Engine;
pub use resource::{DefaultVersion, ResourceRef, WriteOptions};
pub use tracker::{StuckTx, TxTicket, TxTracker};
pub use tx::{CacheKey, Tx};
