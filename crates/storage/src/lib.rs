//! Pluggable document storage (§4.C).
//!
//! [`engine`] defines the opaque CRDT collaborator seam; [`memory`] gives
//! the [`Storage`] trait plus in-memory unencrypted and encrypted
//! implementations; [`factory`] selects between them per document.

pub mod engine;
pub mod error;
pub mod factory;
pub mod memory;

pub use engine::{CrdtEngine, LogEngine};
pub use error::StorageError;
pub use factory::StorageFactory;
pub use memory::{DocumentTransaction, InMemoryEncryptedStorage, InMemoryUnencryptedStorage, Storage};
