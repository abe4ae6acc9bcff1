//! 工具层：注册表、并行执行器与内置工具（search、write_file）

pub mod executor;
pub mod registry;
pub mod schema;
pub mod search;
pub mod write_file;

pub use executor::ParallelToolExecutor;
pub use registry::{Tool, ToolRegistry, ToolSpec};
pub use schema::tool_call_schema_json;
pub use search::WebSearchTool;
pub use write_file::{ArtifactWriter, FsArtifactWriter, WriteFileTool};
