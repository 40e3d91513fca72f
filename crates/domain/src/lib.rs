//! Shared domain types for the deephaven-mcp servers: the workspace-wide
//! error enum, the typed configuration document, and the async config store.

pub mod config;
pub mod error;

pub use error::{Error, Result};
