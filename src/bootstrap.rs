//! Bootstrap: install the agent as a host service.
//!
//! Driven by `--bootstrap-key`, a base64-encoded JSON document issued by
//! the metrics platform. Renders the environment file consumed by the unit
//! and a systemd unit for the agent binary, then enables (and optionally
//! starts) the unit. Runs once and exits; the installed copy takes over.

use std::path::Path;
use std::process::Command;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;

const ENV_FILE_PATH: &str = "/etc/environment.d/panoptes.conf";
const UNIT_FILE_PATH: &str = "/etc/systemd/system/panoptes.service";
const BINARY_INSTALL_PATH: &str = "/usr/local/bin/panoptes";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap key decode failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("bootstrap key is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("systemctl {0} failed: {1}")]
    Systemctl(&'static str, String),
}

fn default_send_interval() -> String {
    "60s".to_string()
}

fn default_autostart() -> bool {
    true
}

/// Payload carried by `--bootstrap-key`.
#[derive(Deserialize)]
pub struct BootstrapKey {
    pub project_id: i64,
    pub metric_service_base_url: String,
    #[serde(default = "default_send_interval")]
    pub send_interval: String,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    #[serde(default)]
    pub pg_username: String,
    #[serde(default)]
    pub pg_password: String,
    #[serde(default)]
    pub pgb_username: String,
    #[serde(default)]
    pub pgb_password: String,
}

impl BootstrapKey {
    /// Decode a base64(JSON) bootstrap key.
    pub fn decode(key: &str) -> Result<Self, BootstrapError> {
        let raw = STANDARD.decode(key.trim())?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Install the agent as a systemd service.
pub fn install(key: &str) -> Result<(), BootstrapError> {
    let key = BootstrapKey::decode(key)?;

    tracing::info!(project_id = key.project_id, "bootstrap: installing host service");

    write_private(Path::new(ENV_FILE_PATH), &render_env_file(&key))?;
    std::fs::write(UNIT_FILE_PATH, render_unit_file())?;

    systemctl(&["daemon-reload"], "daemon-reload")?;
    systemctl(&["enable", "panoptes.service"], "enable")?;
    if key.autostart {
        systemctl(&["restart", "panoptes.service"], "restart")?;
    }

    tracing::info!("bootstrap complete");
    Ok(())
}

fn write_private(path: &Path, content: &str) -> Result<(), BootstrapError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, content)?;
    // The env file carries credentials; keep it out of reach of other users.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn systemctl(args: &[&str], action: &'static str) -> Result<(), BootstrapError> {
    let output = Command::new("systemctl").args(args).output()?;
    if !output.status.success() {
        return Err(BootstrapError::Systemctl(
            action,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

fn render_env_file(key: &BootstrapKey) -> String {
    format!(
        "PROJECTID={}\n\
         METRIC_SERVICE_BASE_URL={}\n\
         SEND_INTERVAL={}\n\
         PG_USERNAME={}\n\
         PG_PASSWORD={}\n\
         PGB_USERNAME={}\n\
         PGB_PASSWORD={}\n",
        key.project_id,
        key.metric_service_base_url,
        key.send_interval,
        key.pg_username,
        key.pg_password,
        key.pgb_username,
        key.pgb_password,
    )
}

fn render_unit_file() -> String {
    format!(
        "[Unit]\n\
         Description=panoptes telemetry agent for the PostgreSQL ecosystem\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User=root\n\
         Group=root\n\
         EnvironmentFile={ENV_FILE_PATH}\n\
         ExecStart={BINARY_INSTALL_PATH} --mode push\n\
         KillMode=process\n\
         TimeoutSec=5\n\
         Restart=on-failure\n\
         OOMScoreAdjust=1000\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}
