// Allow uppercase acronyms for industry-standard terms like NIST, DoD
#![allow(clippy::upper_case_acronyms)]

pub mod certificates;
pub mod config;
pub mod drives;
pub mod executor;
pub mod host;
pub mod methods;
pub mod safety;
pub mod ui;
pub mod verification;
pub mod wipe_orchestrator;

// Re-export main wipe orchestrator for convenience
pub use config::WipeSettings;
pub use wipe_orchestrator::{Refusal, WipeOrchestrator, WipeOutcome, WipeRequest, WipeSession};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Placeholder for metadata the host could not report
pub const UNKNOWN: &str = "Unknown";

/// Cancellation flag shared between whoever requests a stop and the running session.
///
/// Clones observe the same flag. The executor polls it; nothing is interrupted
/// asynchronously.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (called by signal handlers or the UI)
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Coarse grouping of errors, used to map outcomes to exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Refused by safety policy
    Policy,
    /// Bad input from the caller or configuration
    Validation,
    /// Host or tooling problem
    Environment,
    /// The destructive command itself went wrong
    Execution,
    /// Operator asked to stop
    Operator,
    /// Confidence reduced, work still recorded
    Degraded,
}

#[derive(Error, Debug)]
pub enum WipeError {
    #[error("Device enumeration unavailable: {0}")]
    EnumerationUnavailable(String),

    #[error("Wipe blocked by safety policy: {0}")]
    SafetyBlocked(String),

    #[error("Device is mounted at {}", .0.join(", "))]
    MountConflict(Vec<String>),

    #[error("Invalid wipe method: {0} (expected clear, purge or destroy)")]
    InvalidMethod(String),

    #[error("Invalid device path: {0}")]
    InvalidDevicePath(String),

    #[error("Drive not found: {0}")]
    DeviceNotFound(String),

    #[error("Device {device_path} already has an active session ({session_id})")]
    SessionConflict {
        device_path: String,
        session_id: String,
    },

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: WipeState, to: WipeState },

    #[error("Failed to unmount {mount_point}: {reason}")]
    UnmountFailed { mount_point: String, reason: String },

    #[error("Failed to launch wipe command: {0}")]
    ProcessLaunchFailed(String),

    #[error("Wipe command exited with status {}", .0.map_or_else(|| "unknown (terminated by signal)".to_string(), |c| c.to_string()))]
    ProcessExitedNonZero(Option<i32>),

    #[error("Operation cancelled by operator")]
    Cancelled,

    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("Primary record path {path} not writable: {reason}")]
    PersistPrimaryFailed { path: String, reason: String },

    #[error("Failed to persist compliance record: {0}")]
    PersistFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WipeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WipeError::SafetyBlocked(_)
            | WipeError::MountConflict(_)
            | WipeError::SessionConflict { .. } => ErrorClass::Policy,
            WipeError::InvalidMethod(_)
            | WipeError::InvalidDevicePath(_)
            | WipeError::DeviceNotFound(_)
            | WipeError::InvalidTransition { .. }
            | WipeError::Config(_) => ErrorClass::Validation,
            WipeError::EnumerationUnavailable(_)
            | WipeError::UnmountFailed { .. }
            | WipeError::ProcessLaunchFailed(_)
            | WipeError::PersistFailed(_)
            | WipeError::IoError(_)
            | WipeError::Serialization(_) => ErrorClass::Environment,
            WipeError::ProcessExitedNonZero(_) => ErrorClass::Execution,
            WipeError::Cancelled => ErrorClass::Operator,
            WipeError::VerificationUnavailable(_) | WipeError::PersistPrimaryFailed { .. } => {
                ErrorClass::Degraded
            }
        }
    }
}

pub type WipeResult<T> = Result<T, WipeError>;

/// Coarse classification consumed by the safety guard
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    SystemFixed,
    RemovableMedia,
    NetworkOrVirtual,
    Unknown,
}

/// One erasable unit as reported by the device catalog.
///
/// Metadata fields are never absent: anything the host cannot report is
/// [`UNKNOWN`], so serialization and display stay total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub path: String,
    pub display_name: String,
    pub model: String,
    pub serial: String,
    pub vendor: String,
    pub size_bytes: u64,
    pub removable: bool,
    pub device_class: DeviceClass,
}

impl DeviceRecord {
    /// Record for a path the catalog knows nothing else about
    pub fn unknown(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            serial: UNKNOWN.to_string(),
            vendor: UNKNOWN.to_string(),
            size_bytes: 0,
            removable: false,
            device_class: DeviceClass::Unknown,
        }
    }

    /// Last path component, used in record file names
    pub fn basename(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or(UNKNOWN)
    }
}

/// NIST 800-88 sanitization level requested by the operator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WipeMethod {
    Clear,
    Purge,
    Destroy,
}

impl WipeMethod {
    pub const ALL: [WipeMethod; 3] = [WipeMethod::Clear, WipeMethod::Purge, WipeMethod::Destroy];

    pub fn as_str(&self) -> &'static str {
        match self {
            WipeMethod::Clear => "clear",
            WipeMethod::Purge => "purge",
            WipeMethod::Destroy => "destroy",
        }
    }
}

impl fmt::Display for WipeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WipeMethod {
    type Err = WipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" => Ok(WipeMethod::Clear),
            "purge" => Ok(WipeMethod::Purge),
            "destroy" => Ok(WipeMethod::Destroy),
            _ => Err(WipeError::InvalidMethod(s.to_string())),
        }
    }
}

/// Executor state machine: Pending -> Running -> {Completed | Failed | Cancelled}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WipeState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WipeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WipeState::Completed | WipeState::Failed | WipeState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: WipeState) -> bool {
        match self {
            WipeState::Pending => matches!(next, WipeState::Running | WipeState::Failed),
            WipeState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Final status written into the compliance record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WipeStatus {
    Success,
    Failed,
    Cancelled,
}

impl WipeStatus {
    /// Status for a terminal executor state, `None` while the session is live
    pub fn from_state(state: WipeState) -> Option<Self> {
        match state {
            WipeState::Completed => Some(WipeStatus::Success),
            WipeState::Failed => Some(WipeStatus::Failed),
            WipeState::Cancelled => Some(WipeStatus::Cancelled),
            WipeState::Pending | WipeState::Running => None,
        }
    }
}
