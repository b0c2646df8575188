use super::VerificationResult;
use crate::WipeError;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Reads the leading `sample_bytes` of a device and checks they are zero
#[derive(Debug, Clone)]
pub struct SampledVerifier {
    sample_bytes: usize,
}

impl SampledVerifier {
    pub fn new(sample_bytes: usize) -> Self {
        Self {
            sample_bytes: sample_bytes.max(1),
        }
    }

    pub fn sample_bytes(&self) -> usize {
        self.sample_bytes
    }

    /// Verify on a blocking worker so a slow device never stalls the runtime
    pub async fn verify(&self, device_path: &str) -> VerificationResult {
        let verifier = self.clone();
        let path = PathBuf::from(device_path);

        match tokio::task::spawn_blocking(move || verifier.verify_blocking(&path)).await {
            Ok(result) => result,
            Err(e) => VerificationResult::Unavailable(format!("verification task failed: {}", e)),
        }
    }

    pub fn verify_blocking(&self, device_path: &Path) -> VerificationResult {
        let mut file = match File::open(device_path) {
            Ok(file) => file,
            Err(e) => return unavailable(device_path, e.to_string()),
        };

        let mut buffer = vec![0u8; self.sample_bytes];
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return unavailable(device_path, e.to_string()),
            }
        }

        if filled == 0 {
            return unavailable(device_path, "device returned no data".to_string());
        }

        let clean = buffer[..filled].iter().all(|&b| b == 0);
        tracing::info!(
            device = %device_path.display(),
            bytes_sampled = filled,
            clean,
            "Sampled verification finished"
        );

        VerificationResult::VerifiedClean {
            clean,
            bytes_sampled: filled,
        }
    }
}

fn unavailable(device_path: &Path, reason: String) -> VerificationResult {
    let err = WipeError::VerificationUnavailable(format!("{}: {}", device_path.display(), reason));
    tracing::warn!(error = %err, "Verification skipped");
    VerificationResult::Unavailable(reason)
}
