//! SQL identifier validation.
//!
//! Catalog identifiers (database, schema, table names) cannot be bound as
//! query parameters, so any identifier spliced into SQL text must first pass
//! this allow-listed grammar: an ASCII letter or underscore followed by ASCII
//! letters, digits or underscores, at most 128 characters. Anything else is
//! rejected outright; nothing is escaped.

use crate::errors::{AppError, AppResult};

/// Maximum identifier length accepted by SQL Server (`sysname`).
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Validates catalog identifiers before they are interpolated into SQL.
pub struct SqlIdentifier;

impl SqlIdentifier {
    /// Checks `name` against the identifier grammar.
    ///
    /// # Errors
    /// Returns `AppError::InvalidIdentifier` if the name is empty, too long,
    /// starts with a digit or contains any character outside `[A-Za-z0-9_]`.
    pub fn validate(name: &str) -> AppResult<&str> {
        if Self::is_valid(name) {
            Ok(name)
        } else {
            Err(AppError::InvalidIdentifier(format!(
                "'{}' must match [A-Za-z_][A-Za-z0-9_]{{0,127}}",
                name.escape_debug()
            )))
        }
    }

    /// Returns whether `name` satisfies the identifier grammar.
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        name.len() <= MAX_IDENTIFIER_LEN
            && (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Validates `name` and wraps it in brackets for use in SQL text,
    /// e.g. `USE [name]`.
    pub fn bracketed(name: &str) -> AppResult<String> {
        Self::validate(name).map(|n| format!("[{}]", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_identifiers() {
        for name in ["master", "Sales_2024", "_staging", "a"] {
            assert!(SqlIdentifier::is_valid(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_injection_attempts() {
        for name in [
            "",
            "1db",
            "db]; DROP DATABASE x; --",
            "my db",
            "db-name",
            "db.schema",
            "bad'quote",
            "ünicode",
        ] {
            assert!(SqlIdentifier::validate(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_length_limit() {
        assert!(SqlIdentifier::is_valid(&"a".repeat(MAX_IDENTIFIER_LEN)));
        assert!(!SqlIdentifier::is_valid(&"a".repeat(MAX_IDENTIFIER_LEN + 1)));
    }

    #[test]
    fn test_bracketed() {
        assert_eq!(SqlIdentifier::bracketed("Sales").unwrap(), "[Sales]");
        assert!(matches!(
            SqlIdentifier::bracketed("x]y"),
            Err(AppError::InvalidIdentifier(_))
        ));
    }
}
