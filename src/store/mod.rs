//! 持久化层：BlobStore 抽象（内存 / 文件 / SQLite）与 AgentState 序列化

pub mod blob;
pub mod serializer;
pub mod sqlite;

pub use blob::{BlobError, BlobStore, FileBlobStore, InMemoryBlobStore};
pub use serializer::{SavedConversation, StateSerializer, FORMAT_VERSION};
pub use sqlite::SqliteBlobStore;
