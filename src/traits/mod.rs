//! Core traits for entity types
//!
//! These traits define what a type must provide to be queued against a
//! partitioned table.

mod entity;

pub use entity::{DynamicEntity, TableEntity};
