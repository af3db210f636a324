//! Template synchronization and nested record search over a structured-data repository.
//!
//! Everything here is pure: storage, caching and locking live behind the collaborators in
//! `odr-service`.

pub mod cache_keys;
pub mod changelist;
pub mod diff;
pub mod grammar;
pub mod hydrate;
pub mod merge;
pub mod model;
pub mod permissions;
pub mod predicate;
pub mod search_key;
pub mod search_tree;
pub mod stack;
pub mod sync_plan;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
