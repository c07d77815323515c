mod catalog;
mod collection;
mod database;

pub use catalog::{CollectionOptions, DatabaseCatalog};
pub use collection::{Collection, IndexInfo, UpdateResult};
pub use database::{DbStats, ImportMode, WrongoDB, WrongoDBConfig};
