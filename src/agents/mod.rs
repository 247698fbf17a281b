//! Bundled worker agents
//!
//! Both agents implement [`TaskExecutor`](crate::domain::TaskExecutor), the
//! same port the coordinator implements, so they can be served over HTTP or
//! registered in-process under `local://` addresses.
//!
//! - `simple` - canned replies
//! - `tool_agent` - keyword tool selection over a [`ToolRegistry`](crate::tools::ToolRegistry)

pub mod simple;
pub mod tool_agent;

pub use simple::SimpleAgent;
pub use tool_agent::ToolAgent;
