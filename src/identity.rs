//! Host identity.
//!
//! Every metric carries a stable per-host label so streams from different
//! hosts never collide on the back-end. The label is the machine id when
//! readable, otherwise a hash of the hostname.

use sha2::{Digest, Sha256};

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Compute the host identity label. Called once at startup.
pub fn host_identity() -> String {
    match std::fs::read_to_string(MACHINE_ID_PATH) {
        Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
        Ok(_) => {
            tracing::warn!("empty {MACHINE_ID_PATH}, falling back to hashed hostname");
            hashed_hostname()
        }
        Err(e) => {
            tracing::warn!(error = %e, "read {MACHINE_ID_PATH} failed, falling back to hashed hostname");
            hashed_hostname()
        }
    }
}

fn hashed_hostname() -> String {
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    format!("{:x}", hasher.finalize())
}
