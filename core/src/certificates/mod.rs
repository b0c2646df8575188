// Compliance records
//
// - record.rs: record structure, builder, digest
// - store.rs: atomic persistence with a fallback location

pub mod record;
pub mod store;

pub use record::{ComplianceRecord, RecordBuilder, SystemInfo, SCHEMA_VERSION};
pub use store::{load, persist, record_file_name, PersistedRecord};
