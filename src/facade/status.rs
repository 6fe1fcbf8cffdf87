// ============================================================================
// File: src/facade/status.rs
// ----------------------------------------------------------------------------
// System status report: six diagnostic commands, each under a header.
// ============================================================================

use crate::error::DeployResult;
use crate::remote::RemoteSession;

/// One titled diagnostic command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSection {
    pub title: &'static str,
    pub command: &'static str,
}

/// Sections in report order
pub const STATUS_SECTIONS: [StatusSection; 6] = [
    StatusSection {
        title: "Disk usage (df -h /):",
        command: "df -h /",
    },
    StatusSection {
        title: "Memory (free -h):",
        command: "free -h",
    },
    StatusSection {
        title: "Uptime:",
        command: "uptime",
    },
    StatusSection {
        title: "Top 10 processes:",
        command: "top -bn1 | head -n 12",
    },
    StatusSection {
        title: "IP addresses:",
        command: "ip -c a",
    },
    StatusSection {
        title: "Latest system log (tail -n 20 /var/log/syslog):",
        command: "tail -n 20 /var/log/syslog || tail -n 20 /var/log/messages",
    },
];

/// Run every section and concatenate `--- <title>` plus stdout
pub fn collect_status<S: RemoteSession + ?Sized>(session: &mut S) -> DeployResult<String> {
    let mut report = String::new();
    for section in STATUS_SECTIONS {
        let result = session.run(section.command)?;
        report.push_str("--- ");
        report.push_str(section.title);
        report.push('\n');
        report.push_str(&result.stdout);
        report.push('\n');
    }
    Ok(report)
}
