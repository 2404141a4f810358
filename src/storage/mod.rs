//! Storage module
//!
//! Object store gateway, key layout for stored batches, and session record
//! persistence.

pub mod filesystem;
pub mod keys;
pub mod object_store;
pub mod session_store;

pub use filesystem::FileSystemObjectStore;
pub use keys::BatchKey;
pub use object_store::{InMemoryObjectStore, ObjectStore};
pub use session_store::{ObjectStoreSessionStore, SessionStore};
