//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The engine
//! depends only on these traits, not on concrete implementations.

mod source;

pub use source::MigrationSource;
