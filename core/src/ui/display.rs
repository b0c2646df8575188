use super::progress::{format_duration, human_bytes};
use crate::certificates::ComplianceRecord;
use crate::methods::MethodPlan;
use crate::safety::SafetyVerdict;
use crate::wipe_orchestrator::{CheckReport, WipeOutcome};
use crate::{DeviceClass, DeviceRecord, WipeStatus};
use colored::{ColoredString, Colorize};
use std::fmt::Write;
use std::io::{self, BufRead};

/// Word the operator must type before a destructive run
pub const CONFIRMATION_WORD: &str = "DESTROY";

pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

pub fn class_label(class: DeviceClass) -> ColoredString {
    match class {
        DeviceClass::SystemFixed => "system".red(),
        DeviceClass::RemovableMedia => "removable".green(),
        DeviceClass::NetworkOrVirtual => "network/virtual".yellow(),
        DeviceClass::Unknown => "unknown".normal(),
    }
}

pub fn status_label(status: WipeStatus) -> ColoredString {
    match status {
        WipeStatus::Success => "SUCCESS".green().bold(),
        WipeStatus::Failed => "FAILED".red().bold(),
        WipeStatus::Cancelled => "CANCELLED".magenta().bold(),
    }
}

/// Fixed-width device table
pub fn device_table(devices: &[DeviceRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<18} {:<24} {:<16} {:>10}  {}",
        "Device", "Name", "Serial", "Size", "Class"
    );
    let _ = writeln!(out, "{}", "-".repeat(84));

    for device in devices {
        let _ = writeln!(
            out,
            "{:<18} {:<24} {:<16} {:>10}  {}",
            device.path,
            truncate_string(&device.display_name, 24),
            truncate_string(&device.serial, 16),
            human_bytes(device.size_bytes as f64),
            class_label(device.device_class)
        );
    }
    out
}

pub fn plan_summary(plan: &MethodPlan) -> String {
    format!(
        "{} ({}), {} pass(es), tools: {}, expected duration: {}",
        plan.method,
        plan.nist_level,
        plan.pass_count,
        plan.toolchain.join(", "),
        plan.duration_class
    )
}

pub fn check_summary(report: &CheckReport) -> String {
    let mut out = String::new();
    let device = &report.device;
    let _ = writeln!(out, "Device:  {} ({})", device.path, device.display_name);
    let _ = writeln!(out, "Serial:  {}", device.serial);
    let _ = writeln!(out, "Size:    {}", human_bytes(device.size_bytes as f64));
    let _ = writeln!(out, "Class:   {}", class_label(device.device_class));
    if !report.mount_points.is_empty() {
        let _ = writeln!(out, "Mounted: {}", report.mount_points.join(", "));
    }

    let verdict = match &report.verdict {
        SafetyVerdict::Proceed => "safe to wipe".green(),
        SafetyVerdict::RequiresUnmount(points) => {
            format!("unmount required ({})", points.join(", ")).as_str().yellow()
        }
        SafetyVerdict::Blocked(reason) => format!("blocked: {}", reason).as_str().red().bold(),
    };
    let _ = writeln!(out, "Verdict: {}", verdict);

    if let Some(plan) = &report.plan {
        let _ = writeln!(out, "Plan:    {}", plan_summary(plan));
    }
    if let Some(command) = &report.command {
        let _ = writeln!(out, "Command: {}", command);
    }
    out
}

pub fn record_summary(record: &ComplianceRecord) -> String {
    let mut out = String::new();
    let elapsed = (record.finished_at - record.started_at).num_seconds().max(0) as u64;

    let _ = writeln!(out, "Status:       {}", status_label(record.status));
    let _ = writeln!(out, "Certificate:  {}", record.certificate_id);
    let _ = writeln!(out, "Device:       {} ({})", record.device.path, record.device.serial);
    let _ = writeln!(
        out,
        "Method:       {} ({}), {}/{} passes",
        record.wipe_method, record.nist_level, record.passes_completed, record.passes_planned
    );
    let _ = writeln!(out, "Duration:     {}", format_duration(elapsed));
    if let Some(code) = record.exit_code {
        let _ = writeln!(out, "Exit code:    {}", code);
    }

    let verification = match record.verified_clean {
        Some(true) => "sample clean".green(),
        Some(false) => "sample NOT clean".red().bold(),
        None => record
            .verification_note
            .clone()
            .unwrap_or_else(|| "not attempted".to_string())
            .as_str()
            .normal(),
    };
    let _ = writeln!(out, "Verification: {}", verification);
    if let Some(hidden) = record.hidden_areas.as_ref().filter(|h| h.has_hidden_area()) {
        let _ = writeln!(
            out,
            "Hidden area:  {} (HPA: {}, DCO: {}, {} sectors not overwritten)",
            "PRESENT".red().bold(),
            hidden.hpa_present,
            hidden.dco_limited,
            hidden.hpa_hidden_sectors()
        );
    }
    if let Some(raw_log) = &record.raw_log_path {
        let _ = writeln!(out, "Raw log:      {}", raw_log);
    }
    out
}

pub fn outcome_summary(outcome: &WipeOutcome) -> String {
    match outcome {
        WipeOutcome::Refused {
            device_path,
            refusal,
        } => format!(
            "{} {}: {}\n",
            "Refused".red().bold(),
            device_path,
            refusal.message
        ),
        WipeOutcome::Finished {
            record,
            record_path,
        } => format!(
            "{}Record:       {}\n",
            record_summary(record),
            record_path.display()
        ),
        WipeOutcome::Unpersisted { record, error } => format!(
            "{}{} {}\n",
            record_summary(record),
            "Record NOT saved:".red().bold(),
            error
        ),
    }
}

/// Print the warning and `summary` to `out`, then read one line from `input`.
///
/// The CLI passes stderr so `--json` output on stdout stays parseable.
pub fn confirm_destruction<W, R>(
    out: &mut W,
    input: &mut R,
    device_path: &str,
    summary: &str,
) -> io::Result<bool>
where
    W: io::Write,
    R: BufRead,
{
    writeln!(
        out,
        "\n{} This will permanently erase ALL data on {}",
        "WARNING:".red().bold(),
        device_path
    )?;
    write!(out, "{}", summary)?;
    write!(out, "\nType '{}' to confirm: ", CONFIRMATION_WORD)?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == CONFIRMATION_WORD)
}
