//! Attribute/type schema engine for xreg.
//!
//! [`validate_object`] checks a property tree against the attribute set of
//! one entity level (or a nested object), applying defaults, normalizing
//! scalars, activating `ifvalues` siblings, and running the built-in
//! attributes' [`Hooks`]. Problems are reported with the full property
//! path of the offending value (`labels.env`, `tags[2]`).

pub mod hooks;
pub mod scalar;
pub mod validate;

pub use hooks::{Hooks, NoHooks};
pub use validate::{validate_object, ValidateOptions};
