pub mod api;
pub mod core;
pub mod engine;
pub mod index;
pub mod query;
pub mod server;
pub mod storage;
pub mod txn;

pub use crate::api::{Connection, ConnectionConfig, Cursor, CursorKind, Session};
pub use crate::core::errors::{
    DocumentValidationError, IndexError, QueryError, StorageError, WrongoDBError,
};
pub use crate::core::lock_stats::{
    reset_lock_stats, set_lock_stats_enabled, snapshot_lock_stats,
};
pub use crate::engine::{Collection, DbStats, ImportMode, IndexInfo, UpdateResult, WrongoDB, WrongoDBConfig};
pub use crate::server::commands::CommandRegistry;
pub use crate::server::start_server;
pub use crate::storage::block::file::{BlockFile, FileHeader, NONE_BLOCK_ID};
pub use crate::storage::btree::page::{InternalPage, LeafPage};
pub use crate::storage::btree::BTree;
pub use crate::txn::GlobalTxnState;

pub type Document = serde_json::Map<String, serde_json::Value>;
