pub(crate) mod connection;
pub(crate) mod cursor;
pub(crate) mod data_handle_cache;
pub(crate) mod session;

pub use connection::{Connection, ConnectionConfig};
pub use cursor::{Cursor, CursorKind};
pub use session::Session;
