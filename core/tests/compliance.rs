/// Compliance Test Suite Entry Point
///
/// Method-to-standard mapping and record integrity checks.
#[path = "common/mod.rs"]
mod common;

mod compliance {
    pub mod nist_800_88;
    pub mod record_integrity;
}
