//! Entity contract and tracking primitives.
//!
//! # Responsibility
//! - Define what a persistable record must expose to be tracked.
//! - Define the shared handle callers use to read and edit tracked records.
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityKey` within its type.
//! - Tracking state is never stored on the entity itself.

pub mod entity;
pub mod tracked;
