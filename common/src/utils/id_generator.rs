//! Unique ID generator.

use uuid::Uuid;

/// Generates unique identifiers for various entities.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a unique issue ID.
    pub fn issue_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a unique request ID.
    pub fn request_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Generates a short unique ID (first 8 characters of a UUID), used for
    /// alert correlation in webhook payloads.
    pub fn short_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}
