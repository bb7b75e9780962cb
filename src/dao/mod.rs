/// Document store abstraction and its backends.
pub mod doc_store;
/// Entities persisted in the document store.
pub mod models;
/// Retry policy applied to store writes.
pub mod retry;
/// Storage error types shared by every backend.
pub mod storage;
