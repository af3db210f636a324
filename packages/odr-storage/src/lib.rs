pub mod apply;
pub mod cache;
pub mod db;
pub mod hydrate;
pub mod locks;
pub mod models;
pub mod permissions;
pub mod predicates;
pub mod records;
pub mod schema;
pub mod structure;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
