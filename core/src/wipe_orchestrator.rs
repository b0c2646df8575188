// Wipe Orchestrator - sequences one wipe from request to persisted record
//
// Device lease -> catalog lookup -> safety guard (optional unmount) -> method
// plan -> hidden-area check -> executor -> verifier (only after a clean exit)
// -> record -> persist. The lease comes first so a conflicting request never
// reaches the host; every other refusal happens before a destructive command
// exists.

use crate::certificates::{self, ComplianceRecord, RecordBuilder, SystemInfo};
use crate::drives::{DeviceCatalog, MountState};
use crate::executor::{prepare_raw_log, ProgressEvent, ProgressReporter, WipeExecutor};
use crate::host::HostCapabilities;
use crate::methods::{MethodPlan, MethodRegistry, WipeCommand};
use crate::safety::{check_safe, SafetyVerdict};
use crate::verification::{SampledVerifier, VerificationResult};
use crate::{
    CancelToken, DeviceRecord, ErrorClass, WipeError, WipeMethod, WipeResult, WipeSettings,
    WipeState, WipeStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// What the caller asks for
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WipeRequest {
    pub device_path: String,
    /// `clear`, `purge` or `destroy`
    pub method: String,
    pub operator: Option<String>,
    pub auto_unmount: bool,
    /// Overrides the record location derived from `records_dir`
    pub record_path: Option<PathBuf>,
}

impl WipeRequest {
    pub fn new(device_path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            method: method.into(),
            ..Default::default()
        }
    }
}

/// The unit of work for one device/method pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeSession {
    pub session_id: String,
    pub device: DeviceRecord,
    pub method: WipeMethod,
    state: WipeState,
    pub raw_log_path: Option<PathBuf>,
    progress_percent: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WipeSession {
    pub fn new(device: DeviceRecord, method: WipeMethod) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            device,
            method,
            state: WipeState::Pending,
            raw_log_path: None,
            progress_percent: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn state(&self) -> WipeState {
        self.state
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    /// Move to `next`, rejecting anything the state machine does not allow
    pub fn transition(&mut self, next: WipeState) -> WipeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(WipeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
        if next == WipeState::Completed {
            self.progress_percent = 100;
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a progress estimate; never moves backwards, 100 is reserved for `Completed`
    pub fn record_progress(&mut self, percent: u8) {
        if self.state.is_terminal() {
            return;
        }
        self.progress_percent = self.progress_percent.max(percent.min(99));
    }
}

/// Registry view of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub state: WipeState,
}

/// Device paths with a session in `Pending` or `Running`
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<String, ActiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `device_path`, or report the session already holding it
    pub fn acquire(&self, device_path: &str, session_id: &str) -> WipeResult<DeviceLease> {
        let mut active = self.lock();
        if let Some(existing) = active.get(device_path) {
            return Err(WipeError::SessionConflict {
                device_path: device_path.to_string(),
                session_id: existing.session_id.clone(),
            });
        }

        active.insert(
            device_path.to_string(),
            ActiveSession {
                session_id: session_id.to_string(),
                state: WipeState::Pending,
            },
        );
        Ok(DeviceLease {
            registry: self.clone(),
            device_path: device_path.to_string(),
        })
    }

    pub fn get(&self, device_path: &str) -> Option<ActiveSession> {
        self.lock().get(device_path).cloned()
    }

    fn update_state(&self, device_path: &str, state: WipeState) {
        if let Some(entry) = self.lock().get_mut(device_path) {
            entry.state = state;
        }
    }

    fn release(&self, device_path: &str) {
        self.lock().remove(device_path);
    }
}

/// Held for the life of a session; dropping it frees the device path
#[derive(Debug)]
pub struct DeviceLease {
    registry: SessionRegistry,
    device_path: String,
}

impl DeviceLease {
    pub fn update_state(&self, state: WipeState) {
        self.registry.update_state(&self.device_path, state);
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.registry.release(&self.device_path);
    }
}

/// Why a request never reached the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefusalKind {
    InvalidMethod,
    InvalidDevicePath,
    DeviceNotFound,
    SafetyBlocked,
    MountConflict,
    UnmountFailed,
    SessionConflict,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refusal {
    pub kind: RefusalKind,
    pub class: ErrorClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<String>,
}

impl From<WipeError> for Refusal {
    fn from(err: WipeError) -> Self {
        let kind = match &err {
            WipeError::InvalidMethod(_) => RefusalKind::InvalidMethod,
            WipeError::InvalidDevicePath(_) => RefusalKind::InvalidDevicePath,
            WipeError::DeviceNotFound(_) => RefusalKind::DeviceNotFound,
            WipeError::SafetyBlocked(_) => RefusalKind::SafetyBlocked,
            WipeError::MountConflict(_) => RefusalKind::MountConflict,
            WipeError::UnmountFailed { .. } => RefusalKind::UnmountFailed,
            WipeError::SessionConflict { .. } => RefusalKind::SessionConflict,
            _ => RefusalKind::Environment,
        };
        let mount_points = match &err {
            WipeError::MountConflict(points) => points.clone(),
            _ => Vec::new(),
        };

        Self {
            kind,
            class: err.class(),
            message: err.to_string(),
            mount_points,
        }
    }
}

/// Structured end of every request, refusals included
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WipeOutcome {
    Refused {
        device_path: String,
        refusal: Refusal,
    },
    Finished {
        record: Box<ComplianceRecord>,
        record_path: PathBuf,
    },
    /// The wipe ran but neither record location was writable
    Unpersisted {
        record: Box<ComplianceRecord>,
        error: String,
    },
}

impl WipeOutcome {
    pub fn record(&self) -> Option<&ComplianceRecord> {
        match self {
            WipeOutcome::Refused { .. } => None,
            WipeOutcome::Finished { record, .. } | WipeOutcome::Unpersisted { record, .. } => {
                Some(record)
            }
        }
    }

    /// Process exit code: 0 success, 1 failed, 2 refused, 3 cancelled, 4 unpersisted
    pub fn exit_code(&self) -> i32 {
        match self {
            WipeOutcome::Refused { .. } => 2,
            WipeOutcome::Unpersisted { .. } => 4,
            WipeOutcome::Finished { record, .. } => match record.status {
                WipeStatus::Success => 0,
                WipeStatus::Failed => 1,
                WipeStatus::Cancelled => 3,
            },
        }
    }
}

/// Dry-run view of what a wipe would do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub device: DeviceRecord,
    pub mount_points: Vec<String>,
    pub verdict: SafetyVerdict,
    /// Absent when the guard blocks the device
    pub plan: Option<MethodPlan>,
    pub command: Option<String>,
}

/// Everything settled before a session may start
struct Preflight {
    device: DeviceRecord,
    plan: MethodPlan,
    command: WipeCommand,
}

pub struct WipeOrchestrator {
    host: Arc<dyn HostCapabilities>,
    settings: WipeSettings,
    registry: SessionRegistry,
}

impl WipeOrchestrator {
    pub fn new(host: Arc<dyn HostCapabilities>, settings: WipeSettings) -> Self {
        Self {
            host,
            settings,
            registry: SessionRegistry::new(),
        }
    }

    pub fn settings(&self) -> &WipeSettings {
        &self.settings
    }

    pub fn platform(&self) -> &'static str {
        self.host.platform()
    }

    /// Registry over the host's toolset (or the configured custom one)
    pub fn method_registry(&self) -> MethodRegistry {
        MethodRegistry::new(self.host.toolset())
    }

    pub fn catalog(&self) -> DeviceCatalog {
        DeviceCatalog::new(Arc::clone(&self.host))
    }

    pub fn list_devices(&self) -> Vec<DeviceRecord> {
        self.catalog().enumerate()
    }

    /// Session currently holding `device_path`, if any
    pub fn active_session(&self, device_path: &str) -> Option<ActiveSession> {
        self.registry.get(device_path)
    }

    fn mount_state(&self, device_path: &str) -> WipeResult<MountState> {
        let entries = self.host.mount_table()?;
        Ok(MountState::for_device_with(
            &entries,
            device_path,
            self.host.system_volume(),
            |source| self.host.mount_source_disks(source),
        ))
    }

    /// Safety verdict and plan preview, without touching the device
    pub fn check(&self, device_path: &str, method: Option<&str>) -> WipeResult<CheckReport> {
        let method = method.map(str::parse::<WipeMethod>).transpose()?;
        let device = self.catalog().find(device_path)?;
        let mount_state = self.mount_state(&device.path)?;
        let verdict = check_safe(&device, &mount_state);

        let (plan, command) = match (method, &verdict) {
            (_, SafetyVerdict::Blocked(_)) | (None, _) => (None, None),
            (Some(method), _) => {
                let plan = self.method_registry().resolve(method);
                let command = plan.command_for(&device.path)?.to_string();
                (Some(plan), Some(command))
            }
        };

        Ok(CheckReport {
            device,
            mount_points: mount_state.mount_points,
            verdict,
            plan,
            command,
        })
    }

    /// Standalone sampled read of a device
    pub async fn verify_device(&self, device_path: &str) -> VerificationResult {
        SampledVerifier::new(self.settings.verify_sample_bytes)
            .verify(device_path)
            .await
    }

    fn preflight(&self, request: &WipeRequest) -> WipeResult<Preflight> {
        let method: WipeMethod = request.method.parse()?;
        let device = self.catalog().find(&request.device_path)?;

        let mut mount_state = self.mount_state(&device.path)?;
        let mut verdict = check_safe(&device, &mount_state);

        if let SafetyVerdict::RequiresUnmount(mount_points) = &verdict {
            if request.auto_unmount || self.settings.auto_unmount {
                for mount_point in mount_points {
                    self.host.unmount(mount_point)?;
                }
                mount_state = self.mount_state(&device.path)?;
                verdict = check_safe(&device, &mount_state);
            }
        }
        if let Some(err) = verdict.into_error() {
            return Err(err);
        }

        let plan = self.method_registry().resolve(method);
        let command = plan.command_for(&device.path)?;

        Ok(Preflight {
            device,
            plan,
            command,
        })
    }

    /// Run one wipe to a structured outcome.
    ///
    /// Progress events go to `progress` when given; `cancel` is observed for the
    /// whole destructive phase.
    pub async fn wipe(
        &self,
        request: WipeRequest,
        cancel: CancelToken,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> WipeOutcome {
        let session_id = Uuid::new_v4().to_string();
        let lease = match self.registry.acquire(&request.device_path, &session_id) {
            Ok(lease) => lease,
            Err(err) => return self.refuse(&request.device_path, err),
        };

        // A refusal drops the lease on return
        let preflight = match self.preflight(&request) {
            Ok(preflight) => preflight,
            Err(err) => return self.refuse(&request.device_path, err),
        };
        let Preflight {
            device,
            plan,
            command,
        } = preflight;

        let hidden_areas = self.host.hidden_areas(&device);
        let mut session = WipeSession::new(device, plan.method);
        session.session_id = session_id;

        tracing::info!(
            session_id = %session.session_id,
            device = %session.device.path,
            method = %plan.method,
            passes = plan.pass_count,
            command = %command,
            "Starting wipe session"
        );

        let mut reporter = ProgressReporter::new(progress);
        let raw_log_name = format!("{}_{}.log", session.session_id, session.device.basename());
        let exit_code = match prepare_raw_log(
            &self.settings.raw_log_dir,
            &self.settings.fallback_dir,
            &raw_log_name,
        ) {
            Ok(raw_log_path) => {
                session.raw_log_path = Some(raw_log_path.clone());
                self.advance(&mut session, &lease, WipeState::Running);

                let executor = WipeExecutor::from_settings(&self.settings);
                let outcome = executor
                    .execute(&command, &raw_log_path, &cancel, &mut reporter)
                    .await;

                session.record_progress(outcome.progress_percent);
                self.advance(&mut session, &lease, outcome.state);
                tracing::info!(
                    session_id = %session.session_id,
                    state = ?outcome.state,
                    exit_code = ?outcome.exit_code,
                    message = %outcome.message,
                    "Wipe session finished"
                );
                outcome.exit_code
            }
            Err(err) => {
                tracing::error!(session_id = %session.session_id, error = %err, "No raw log location");
                reporter.start("starting");
                reporter.finish(WipeState::Failed, &err.to_string());
                self.advance(&mut session, &lease, WipeState::Failed);
                None
            }
        };

        let verification = if session.state() == WipeState::Completed {
            Some(self.verify_device(&session.device.path).await)
        } else {
            None
        };

        let operator = request
            .operator
            .clone()
            .or_else(|| self.settings.operator.clone())
            .unwrap_or_else(|| self.host.operator());
        let record = RecordBuilder::new(operator, SystemInfo::collect(self.host.platform()))
            .with_hidden_areas(hidden_areas)
            .build(&session, &plan, exit_code, verification.as_ref());

        let primary_path = request.record_path.clone().unwrap_or_else(|| {
            self.settings
                .records_dir
                .join(certificates::record_file_name(&record))
        });

        let persisted = certificates::persist(record.clone(), &primary_path, &self.settings.fallback_dir);
        let outcome = match persisted {
            Ok(saved) => WipeOutcome::Finished {
                record: Box::new(saved.record),
                record_path: saved.path,
            },
            Err(err) => {
                tracing::error!(session_id = %session.session_id, error = %err, "Compliance record not persisted");
                WipeOutcome::Unpersisted {
                    record: Box::new(record),
                    error: err.to_string(),
                }
            }
        };

        drop(lease);
        outcome
    }

    fn advance(&self, session: &mut WipeSession, lease: &DeviceLease, next: WipeState) {
        match session.transition(next) {
            Ok(()) => lease.update_state(next),
            Err(e) => tracing::error!(session_id = %session.session_id, error = %e, "Rejected session transition"),
        }
    }

    fn refuse(&self, device_path: &str, err: WipeError) -> WipeOutcome {
        tracing::warn!(device = %device_path, error = %err, class = ?err.class(), "Wipe refused");
        WipeOutcome::Refused {
            device_path: device_path.to_string(),
            refusal: Refusal::from(err),
        }
    }
}
