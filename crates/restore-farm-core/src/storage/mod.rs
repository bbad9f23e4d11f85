pub mod audit;
pub mod models;
pub mod queries;
pub mod sqlite;

pub use audit::AuditLog;
pub use sqlite::MetadataStore;
