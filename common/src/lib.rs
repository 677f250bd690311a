//! Shared building blocks for the SQL Server monitoring service.
//!
//! - `config`: environment-driven service configuration
//! - `errors`: the application error type and its HTTP mapping
//! - `models`: monitoring data model shared by collectors, handlers and clients
//! - `response`: the unified API response envelope
//! - `middleware`: request-scoped middleware
//! - `utils`: identifier validation and ID generation

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
