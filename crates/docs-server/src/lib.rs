//! The documentation assistant: a thin MCP server proxying chat requests
//! to the Inkeep-powered documentation LLM.

pub mod inkeep;
pub mod tools;

pub use inkeep::{ChatMessage, InkeepClient};
