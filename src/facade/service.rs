// ============================================================================
// File: src/facade/service.rs
// ----------------------------------------------------------------------------
// systemd service control with an allow-listed action and a checked
// service name.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{DeployError, DeployResult};

/// Permitted service-manager actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Status,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Status => "status",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAction {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            "status" => Ok(ServiceAction::Status),
            other => Err(DeployError::config(format!(
                "unknown service action '{other}' (expected start, stop, restart or status)"
            ))),
        }
    }
}

/// Raw output of a service command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub stdout: String,
    pub stderr: String,
}

/// Reject names that could carry shell syntax into the remote command
pub fn validate_service_name(service: &str) -> DeployResult<()> {
    let valid = !service.is_empty()
        && service
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-'))
        && !service.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(DeployError::config(format!("invalid service name '{service}'")))
    }
}

/// `sudo systemctl <action> <service>`
pub fn service_command(service: &str, action: ServiceAction) -> DeployResult<String> {
    validate_service_name(service)?;
    Ok(format!("sudo systemctl {action} {service}"))
}
