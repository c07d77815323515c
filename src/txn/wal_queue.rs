//! Per-transaction staging area for WAL records.
//!
//! Writes are queued here as they happen and only handed to the WAL at
//! commit time, once as a single locked batch, instead of fsyncing on
//! every cursor operation.

#[derive(Debug, Clone)]
pub enum PendingWalOp {
    Put {
        store_name: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        store_name: String,
        key: Vec<u8>,
    },
}
