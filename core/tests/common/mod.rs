#![allow(dead_code)]

/// Common test utilities for integration tests
///
/// - fake_host: in-memory HostCapabilities with a mutable mount table
/// - image_drive: temp-file "devices" and content checks
pub mod fake_host;
pub mod image_drive;
