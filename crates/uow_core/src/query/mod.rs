//! Query composition: specs, ordering, eager-loading and paging.
//!
//! # Responsibility
//! - Describe what a caller wants to read without touching a store.
//! - Apply those fragments in one fixed order over a fetched snapshot.

pub(crate) mod compose;
pub mod include;
pub mod order;
pub mod page;
pub mod spec;
