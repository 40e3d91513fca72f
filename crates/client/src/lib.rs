//! Client for the Deephaven worker wire protocol.
//!
//! The control plane treats worker RPCs as opaque: run a script, enumerate
//! tables, snapshot a table or its meta table, ping, close. This crate is
//! the one place that knows how those RPCs travel (an HTTP JSON API).

pub mod coreplus;
pub mod queries;
pub mod session;
pub mod table;

pub use coreplus::{
    CorePlusSession, CorePlusSessionFactory, NewSessionParams, PersistentQueryInfo,
};
pub use session::{BaseSession, CoreSession};
pub use table::{ColumnSpec, TableInfo, TableSnapshot};

/// Whether this build carries enterprise (Core+) worker support.
///
/// Registries consult this before constructing factories; configurations
/// that name enterprise systems are rejected when it is `false`.
pub const ENTERPRISE_AVAILABLE: bool = cfg!(feature = "coreplus");
