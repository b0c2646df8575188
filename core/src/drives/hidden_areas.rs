// Host Protected Area / Device Configuration Overlay detection
//
// Detection only. Sectors behind an HPA or DCO are out of reach for dd and
// shred, so the finding is written into the compliance record instead.

use serde::{Deserialize, Serialize};

/// What the host found about sectors hidden from normal writes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenAreaReport {
    pub hpa_present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_max_sectors: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_max_sectors: Option<u64>,
    pub dco_limited: bool,
    /// Why detection could not answer, when it could not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HiddenAreaReport {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            note: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn has_hidden_area(&self) -> bool {
        self.hpa_present || self.dco_limited
    }

    /// Sectors between the current and native max address
    pub fn hpa_hidden_sectors(&self) -> u64 {
        match (self.current_max_sectors, self.native_max_sectors) {
            (Some(current), Some(native)) => native.saturating_sub(current),
            _ => 0,
        }
    }

    /// Build a report from `hdparm -N` and (optionally) `hdparm --dco-identify` output
    pub fn from_hdparm(max_output: &str, dco_output: Option<&str>) -> Self {
        let (current, native, enabled) = parse_max_sectors(max_output);
        let hpa_present = enabled || matches!((current, native), (Some(c), Some(n)) if c < n);

        let dco_limited = match (dco_output.and_then(parse_dco_real_max), native.or(current)) {
            (Some(real), Some(native)) => real > native,
            _ => false,
        };

        let note = if current.is_none() && native.is_none() {
            Some("hdparm -N reported no max sectors".to_string())
        } else {
            None
        };

        Self {
            hpa_present,
            current_max_sectors: current,
            native_max_sectors: native,
            dco_limited,
            note,
        }
    }
}

/// Parse `max sectors   = 586070255/586072368, HPA is enabled`
pub fn parse_max_sectors(output: &str) -> (Option<u64>, Option<u64>, bool) {
    let Some(line) = output.lines().find(|line| line.contains("max sectors")) else {
        return (None, None, false);
    };

    let enabled = line.contains("HPA is enabled");
    let values = line
        .split_once('=')
        .map(|(_, rest)| rest.split(',').next().unwrap_or("").trim())
        .unwrap_or("");

    let mut parts = values.split('/').map(|v| v.trim().parse::<u64>().ok());
    let current = parts.next().flatten();
    let native = parts.next().flatten();
    (current, native, enabled)
}

/// Parse the `Real max sectors: N` line of `hdparm --dco-identify`
pub fn parse_dco_real_max(output: &str) -> Option<u64> {
    output
        .lines()
        .find(|line| line.contains("Real max sectors"))
        .and_then(|line| line.rsplit(':').next())
        .and_then(|value| value.trim().parse().ok())
}
