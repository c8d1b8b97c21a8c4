//! Foundation types for xreg.
//!
//! This crate provides the value, path, identity and error types shared by
//! every other xreg crate.
//!
//! # Key Types
//!
//! - [`Value`]: Closed sum type for property values, produced once at the JSON boundary
//! - [`Object`]: A property tree (ordered map of name to [`Value`])
//! - [`PropPath`]: Location of a property inside a tree (`labels.env`, `tags[2]`)
//! - [`EntityType`]: The five entity kinds: Registry, Group, Resource, Meta, Version
//! - [`Timestamp`]: Canonical RFC 3339 UTC timestamps
//! - [`ContentId`]: Content-addressed identifier for document bodies
//! - [`Problem`]: Structured, machine-actionable user-facing error

pub mod content;
pub mod entity;
pub mod error;
pub mod path;
pub mod problem;
pub mod timestamp;
pub mod value;

pub use content::ContentId;
pub use entity::{AccessMode, AddMode, EntityType};
pub use error::TypeError;
pub use path::{PathSeg, PropPath};
pub use problem::{Problem, ProblemKind};
pub use timestamp::Timestamp;
pub use value::{Object, Value};

/// Prefix marking engine-private properties that callers never see.
pub const SYSTEM_PREFIX: char = '#';

/// Returns `true` if `name` is an engine-private (`#`-prefixed) property.
pub fn is_system_name(name: &str) -> bool {
    name.starts_with(SYSTEM_PREFIX)
}
