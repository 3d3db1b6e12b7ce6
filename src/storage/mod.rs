pub mod session_store;

pub use session_store::{
    FileSessionStore, RecordState, SessionStore, SharedSessionStore, StoredRecord,
};
