pub mod registry;

pub use registry::{ToolDef, ToolExecutor, ToolRegistry, ToolResult};
