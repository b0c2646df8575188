use crate::drives::HiddenAreaReport;
use crate::methods::MethodPlan;
use crate::verification::VerificationResult;
use crate::wipe_orchestrator::WipeSession;
use crate::{DeviceRecord, WipeMethod, WipeResult, WipeStatus, UNKNOWN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use sysinfo::System;
use uuid::Uuid;

pub const SCHEMA_VERSION: &str = "1.0";

pub const FLAG_NIST_800_88: &str = "NIST-800-88";
pub const FLAG_DOD_5220_22_M: &str = "DoD-5220.22-M";

/// Durable proof-of-erasure document, one per finished session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub schema_version: String,
    pub certificate_id: String,
    pub session_id: String,
    pub device: DeviceRecord,
    pub device_fingerprint: String,
    pub wipe_method: WipeMethod,
    pub nist_level: String,
    pub passes_planned: u32,
    pub passes_completed: u32,
    pub tools_used: Vec<String>,
    pub status: WipeStatus,
    pub exit_code: Option<i32>,
    /// Absent when verification was not attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_clean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_note: Option<String>,
    /// HPA/DCO findings taken before the wipe; absent when no detection ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_areas: Option<HiddenAreaReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub operator: String,
    pub raw_log_path: Option<String>,
    pub compliance_flags: BTreeMap<String, bool>,
    pub system: SystemInfo,
    /// Primary path that could not be written, when the record landed in the fallback location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<String>,
    /// SHA-256 over the record serialized with this field empty
    pub record_digest: String,
}

impl ComplianceRecord {
    pub fn compute_digest(&self) -> WipeResult<String> {
        let mut unsealed = self.clone();
        unsealed.record_digest = String::new();
        let json = serde_json::to_string(&unsealed)?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Recompute `record_digest`; needed after any field changes
    pub fn seal(&mut self) -> WipeResult<()> {
        self.record_digest = self.compute_digest()?;
        Ok(())
    }

    /// True when the stored digest matches the record contents
    pub fn verify_digest(&self) -> bool {
        self.compute_digest()
            .map(|expected| expected == self.record_digest)
            .unwrap_or(false)
    }
}

/// Where and with what the wipe ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub tool_version: String,
    pub platform: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub host_name: String,
}

impl SystemInfo {
    pub fn collect(platform: &str) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: platform.to_string(),
            os_name: System::name().unwrap_or_else(|| UNKNOWN.to_string()),
            os_version: System::os_version().unwrap_or_else(|| UNKNOWN.to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| UNKNOWN.to_string()),
            host_name: System::host_name().unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

/// Hash of the identifying device metadata
pub fn device_fingerprint(device: &DeviceRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device.model.as_bytes());
    hasher.update(device.serial.as_bytes());
    hasher.update(device.size_bytes.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn compliance_flags(method: WipeMethod) -> BTreeMap<String, bool> {
    let mut flags = BTreeMap::new();
    flags.insert(FLAG_NIST_800_88.to_string(), true);
    flags.insert(
        FLAG_DOD_5220_22_M.to_string(),
        matches!(method, WipeMethod::Purge | WipeMethod::Destroy),
    );
    flags
}

pub struct RecordBuilder {
    operator: String,
    system: SystemInfo,
    hidden_areas: Option<HiddenAreaReport>,
}

impl RecordBuilder {
    pub fn new(operator: impl Into<String>, system: SystemInfo) -> Self {
        let operator = operator.into();
        let operator = if operator.trim().is_empty() {
            UNKNOWN.to_string()
        } else {
            operator
        };
        Self {
            operator,
            system,
            hidden_areas: None,
        }
    }

    pub fn with_hidden_areas(mut self, report: HiddenAreaReport) -> Self {
        self.hidden_areas = Some(report);
        self
    }

    /// Assemble the sealed record for a session that has reached a terminal state
    pub fn build(
        &self,
        session: &WipeSession,
        plan: &MethodPlan,
        exit_code: Option<i32>,
        verification: Option<&VerificationResult>,
    ) -> ComplianceRecord {
        let status = WipeStatus::from_state(session.state()).unwrap_or_else(|| {
            tracing::warn!(
                session_id = %session.session_id,
                state = ?session.state(),
                "Record built for a live session, recording as failed"
            );
            WipeStatus::Failed
        });

        let passes_completed = if status == WipeStatus::Success {
            plan.pass_count
        } else {
            0
        };

        let mut record = ComplianceRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            certificate_id: Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            device: session.device.clone(),
            device_fingerprint: device_fingerprint(&session.device),
            wipe_method: session.method,
            nist_level: plan.nist_level.clone(),
            passes_planned: plan.pass_count,
            passes_completed,
            tools_used: plan.toolchain.clone(),
            status,
            exit_code,
            verified_clean: verification.and_then(VerificationResult::verified_clean),
            verification_note: verification.map(VerificationResult::note),
            hidden_areas: self.hidden_areas.clone(),
            started_at: session.started_at,
            finished_at: session.finished_at.unwrap_or_else(Utc::now),
            operator: self.operator.clone(),
            raw_log_path: session
                .raw_log_path
                .as_ref()
                .map(|p| p.display().to_string()),
            compliance_flags: compliance_flags(session.method),
            system: self.system.clone(),
            fallback_from: None,
            record_digest: String::new(),
        };
        if let Err(e) = record.seal() {
            tracing::error!(error = %e, "Failed to compute record digest");
        }

        tracing::info!(
            certificate_id = %record.certificate_id,
            session_id = %record.session_id,
            status = ?record.status,
            "Compliance record built"
        );
        record
    }
}
