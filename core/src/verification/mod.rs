// Post-wipe verification
//
// A bounded, best-effort check: a leading sample of the device is read and
// tested for zeros. `false` means "not confirmed clean", never "wipe failed".

pub mod sampled;

pub use sampled::SampledVerifier;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationResult {
    VerifiedClean { clean: bool, bytes_sampled: usize },
    Unavailable(String),
}

impl VerificationResult {
    /// Value for the record's `verifiedClean` field
    pub fn verified_clean(&self) -> Option<bool> {
        match self {
            VerificationResult::VerifiedClean { clean, .. } => Some(*clean),
            VerificationResult::Unavailable(_) => None,
        }
    }

    /// Human-readable explanation kept alongside the result
    pub fn note(&self) -> String {
        match self {
            VerificationResult::VerifiedClean { clean: true, bytes_sampled } => {
                format!("leading {} bytes read back as zero", bytes_sampled)
            }
            VerificationResult::VerifiedClean { clean: false, bytes_sampled } => format!(
                "leading {} bytes not all zero; not confirmed clean (non-zero final pass or unsampled region)",
                bytes_sampled
            ),
            VerificationResult::Unavailable(reason) => format!("verification unavailable: {}", reason),
        }
    }
}
