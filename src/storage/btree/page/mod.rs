pub mod internal;
pub mod leaf;

pub use internal::{InternalPage, InternalPageError};
pub use leaf::{LeafPage, LeafPageError};
