//! MCP protocol layer: JSON-RPC types, message shapes, stdio loop

pub mod messages;
pub mod stdio;
pub mod types;
