//! cloak-storage: OpenDAL-backed object store with encrypted names

pub mod blob;
pub mod operator;
pub mod store;

pub use blob::{BlobRef, Bucket};
pub use operator::build_operator;
pub use store::BlobStore;
