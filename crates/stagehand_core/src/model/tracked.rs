//! Shared entity handles and tracking states.

use serde::Serialize;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

/// Lifecycle state of one tracked entity within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Matches the last known store values.
    Unchanged,
    /// Staged for insert; not in the store yet.
    Added,
    /// Staged for a full-row update.
    Modified,
    /// Staged for delete.
    Deleted,
    /// Not tracked by the session.
    Detached,
}

impl TrackingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Detached => "detached",
        }
    }

    /// Returns whether commit has work to do for this state.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl Display for TrackingState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to one entity instance.
///
/// The session's identity map hands out clones of the same handle for the
/// same identity, so edits made through one clone are visible through every
/// other. Editing fields does not change the tracking state; stage the edit
/// with `Repository::update`.
///
/// Do not hold a `borrow()` guard across repository or unit-of-work calls:
/// reload and merge write through the handle.
pub struct Tracked<T>(Rc<RefCell<T>>);

impl<T> Tracked<T> {
    /// Wraps a value in a new handle that no session tracks yet.
    pub fn new(entity: T) -> Self {
        Self(Rc::new(RefCell::new(entity)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Returns whether both handles point at the same instance.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.0, &other.0)
    }

    /// Address of the shared instance; stable while any handle is alive.
    pub(crate) fn instance_id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn replace(&self, entity: T) {
        *self.0.borrow_mut() = entity;
    }
}

impl<T: Clone> Tracked<T> {
    /// Clones the current value out of the handle.
    pub fn snapshot(&self) -> T {
        self.0.borrow().clone()
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Debug> Debug for Tracked<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.0.borrow()).finish()
    }
}

impl<T> From<T> for Tracked<T> {
    fn from(entity: T) -> Self {
        Self::new(entity)
    }
}
