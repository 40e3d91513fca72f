//! The systems MCP server: tool handlers over the session control plane,
//! dispatched from a newline-delimited JSON-RPC stdio loop.

pub mod context;
pub mod protocol;
pub mod server;
pub mod tools;

pub use context::ToolContext;
