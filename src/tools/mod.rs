//! 工具层：Schema、注册表（封闭的 ToolHandle 分派）、带超时与审计的调用器、内置工具（含可选的 wikipedia / web_search）

pub mod calculator;
pub mod clock;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod web_search;
pub mod wikipedia;

pub use executor::ToolInvoker;
pub use registry::{Tool, ToolHandle, ToolRegistry, ToolSpec};
pub use schema::ToolSchema;
pub use web_search::WebSearchTool;
pub use wikipedia::WikipediaTool;
