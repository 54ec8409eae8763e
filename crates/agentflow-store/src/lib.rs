pub mod database;
pub mod error;
pub mod kv;
pub mod schema;
pub mod session_identity;

pub use database::Database;
pub use error::StoreError;
pub use kv::KvRepo;
pub use session_identity::{
    MemorySessionStore, SessionIdentity, SessionIdentityStore, SqliteSessionStore,
};
