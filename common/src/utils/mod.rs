//! Utility functions and helpers.

pub mod id_generator;
pub mod sql_identifier;

// Re-export commonly used types
pub use id_generator::IdGenerator;
pub use sql_identifier::SqlIdentifier;
