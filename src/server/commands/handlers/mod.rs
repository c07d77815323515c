mod aggregation;
mod connection;
pub mod crud;
mod cursor;
mod database;
mod index;

pub use aggregation::*;
pub use connection::*;
pub use crud::*;
pub use cursor::*;
pub use database::*;
pub use index::*;
