//! Repository layer over a shared session.
//!
//! # Responsibility
//! - Define the typed CRUD/query contract callers program against.
//! - Define the error taxonomy shared with the unit of work.
//!
//! # Invariants
//! - Repository operations mutate the shared session, never local state.
//! - Not-found is `Ok(None)`; ambiguity and protocol misuse are errors.

pub mod error;
pub mod query;
pub mod repository;
