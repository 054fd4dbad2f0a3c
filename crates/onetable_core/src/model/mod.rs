//! Object mapping model shared by every other layer.
//!
//! # Responsibility
//! - Define the entity contract and the shared handles the tracker observes.
//! - Define the dynamically typed document tree the store speaks.
//!
//! # Invariants
//! - Documents are the only dynamically shaped data in the crate.

pub mod document;
pub mod entity;
