//! Storage traits and implementations
//!
//! This module defines the repository abstraction for mirrored rows.
//! The trait-based design allows swapping between in-memory and persistent
//! storage implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::Repository;
