use xreg_model::{CheckHook, UpdateHook};
use xreg_types::{Object, Problem, Value};

/// Entity-side callbacks for built-in attribute hooks.
///
/// The schema engine knows *when* a hook runs (after the attribute's value
/// has been validated, check before update); the implementor knows what
/// the hook means for the entity being validated.
pub trait Hooks {
    /// Cross-field check for attribute `name`. Must not modify the object.
    fn check(&mut self, hook: CheckHook, name: &str, obj: &Object) -> Result<(), Problem>;

    /// Derive or stamp the value of attribute `name`.
    fn update(&mut self, hook: UpdateHook, name: &str, obj: &mut Object) -> Result<(), Problem>;

    /// Committed value of top-level attribute `name`, if the entity has
    /// one. Read-only and immutable attributes may not move away from it.
    fn committed(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Hooks that do nothing. Used for nested objects and model-only checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {
    fn check(&mut self, _hook: CheckHook, _name: &str, _obj: &Object) -> Result<(), Problem> {
        Ok(())
    }

    fn update(&mut self, _hook: UpdateHook, _name: &str, _obj: &mut Object) -> Result<(), Problem> {
        Ok(())
    }
}
