//! Registry model for xreg.
//!
//! A [`Model`] declares the group types of a registry, the resource types
//! inside each group, and the attributes every level carries. Built-in
//! attributes (ids, `epoch`, timestamps, ancestry, default-version
//! bookkeeping) come from [`builtin`] and are merged with the user's
//! declarations when the schema engine asks for a level's attribute set.
//!
//! # Key Types
//!
//! - [`Model`]: Groups, resources and registry-level attributes
//! - [`Attribute`]: One attribute definition, including engine hooks
//! - [`VersionModeKind`]: Which ancestry strategy a resource type uses
//! - [`Xid`] / [`XidTarget`]: Entity addresses and `xid` targets

pub mod attribute;
pub mod builtin;
pub mod error;
pub mod model;
pub mod names;
pub mod xid;

pub use attribute::{
    attributes_of, AttrType, Attribute, Attributes, CheckHook, IfValue, Internals, Item,
    UpdateHook,
};
pub use error::{ModelError, ModelResult};
pub use model::{GroupModel, Model, ResourceModel, VersionModeKind};
pub use names::NameCharset;
pub use xid::{VersionsPart, Xid, XidTarget};
