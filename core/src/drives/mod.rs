// Drive discovery
//
// - detection.rs: device catalog, normalization and classification
// - mounts.rs: mount table and system-volume facts
// - hidden_areas.rs: HPA/DCO findings parsed from hdparm

pub mod detection;
pub mod hidden_areas;
pub mod mounts;


pub use detection::{CatalogReport, DeviceCatalog};
pub use hidden_areas::HiddenAreaReport;
pub use mounts::{MountEntry, MountState, SystemVolume};
