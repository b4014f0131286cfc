use std::sync::{Arc, OnceLock};

use crate::{Direction, MathTransform, Result};

/// Memoized inverse of a transform, with one slot per [Direction].
///
/// The slot for a direction holds the inverse of the owning transform
/// while the owner is in that direction,
/// so flipping the owner in place never invalidates a cached inverse.
/// Each slot is filled at most once, even under concurrent access.
#[derive(Default)]
pub struct InverseCache {
    slots: [OnceLock<Arc<dyn MathTransform>>; 2],
}

impl InverseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached inverse for this direction, if it has been built.
    pub fn get(&self, direction: Direction) -> Option<&Arc<dyn MathTransform>> {
        self.slots[direction.index()].get()
    }

    /// Get the cached inverse for this direction, building it with `f` if necessary.
    ///
    /// If two threads race to build the inverse, both receive the one which was stored.
    pub fn get_or_try_init<F>(&self, direction: Direction, f: F) -> Result<Arc<dyn MathTransform>>
    where
        F: FnOnce() -> Result<Arc<dyn MathTransform>>,
    {
        let slot = &self.slots[direction.index()];
        if let Some(t) = slot.get() {
            return Ok(t.clone());
        }
        let built = f()?;
        Ok(slot.get_or_init(|| built).clone())
    }
}

/// A cloned transform starts with an empty cache.
impl Clone for InverseCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InverseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InverseCache")
            .field("forward", &self.get(Direction::Forward).is_some())
            .field("inverse", &self.get(Direction::Inverse).is_some())
            .finish()
    }
}
