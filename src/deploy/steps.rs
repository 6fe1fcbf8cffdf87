// ============================================================================
// File: src/deploy/steps.rs
// ----------------------------------------------------------------------------
// The provisioning sequence and per-step records.
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::remote::CommandResult;

use super::classifier::Verdict;

/// One command in the provisioning sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStep {
    pub label: String,
    pub command: String,
}

impl ProvisioningStep {
    pub fn new<L: Into<String>, C: Into<String>>(label: L, command: C) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }
}

/// Disk, memory and uptime checks, package refresh and install, process
/// snapshot, interface listing
pub fn default_provisioning_steps() -> Vec<ProvisioningStep> {
    vec![
        ProvisioningStep::new("disk usage", "df -h /"),
        ProvisioningStep::new("memory", "free -h"),
        ProvisioningStep::new("uptime", "uptime"),
        ProvisioningStep::new("package index refresh", "sudo apt update"),
        ProvisioningStep::new(
            "package installation",
            "sudo apt install -y htop iftop net-tools",
        ),
        ProvisioningStep::new("process snapshot", "top -bn1 | head -n 10"),
        ProvisioningStep::new("network interfaces", "ip -c a"),
    ]
}

/// What happened when one step ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: ProvisioningStep,
    pub result: CommandResult,
    pub verdict: Verdict,
}
