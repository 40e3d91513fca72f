/// Shared error type used across all deephaven-mcp crates.
///
/// Each variant is a distinguished error kind; library layers propagate
/// these freely with `?`, and the tool-handler boundary is the single place
/// where they are converted into structured `{success: false, ...}` results.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid, missing, or inaccessible configuration; missing environment
    /// variable; named entity absent from the configuration document.
    #[error("configuration error: {0}")]
    Config(String),

    /// A registry operation was attempted before `initialize()` completed.
    #[error("{0} not initialized; call initialize() first")]
    NotInitialized(String),

    /// A name lookup failed.
    #[error("{0}")]
    NotFound(String),

    /// An item manager's create step failed. Always carries the underlying
    /// cause in the message; the manager's cached slot remains empty.
    #[error("{0}")]
    SessionCreation(String),

    /// Transport-level failure reaching a worker or a session factory.
    #[error("connection error: {0}")]
    Connection(String),

    /// Semantic failure from a worker RPC (script failed, table missing).
    #[error("{0}")]
    Query(String),

    /// A feature was requested against a session kind that does not
    /// support it (e.g. pip listing on a non-Python session).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Failure from the external LLM client (docs side).
    #[error("LLM client error: {0}")]
    Client(String),

    /// Programming errors: registry misuse, invariant violations.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let e = Error::Config("missing file".into());
        assert_eq!(e.to_string(), "configuration error: missing file");

        let e = Error::NotInitialized("CommunitySessionRegistry".into());
        assert!(e.to_string().contains("not initialized"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
