// ============================================================================
// File: src/config.rs
// ----------------------------------------------------------------------------
// Configuration record: VM descriptors, hypervisor executable, log file and
// readiness timings. Loaded once from TOML and treated as read-only.
// ============================================================================

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::readiness::ProbeConfig;

/// Identity and connection facts for one virtual machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmDescriptor {
    /// Display name, also the key for the per-VM run lock
    pub name: String,

    /// Path of the VM image (.vmx) handed to the hypervisor executable
    pub image_path: PathBuf,

    /// Host name or address the guest's SSH daemon listens on
    pub ssh_host: String,

    /// Login user on the guest
    pub ssh_user: String,

    /// Private key used to authenticate
    pub ssh_key_path: PathBuf,
}

impl VmDescriptor {
    /// Create a descriptor with the given name and image, SSH facts empty
    pub fn new<N: Into<String>, P: Into<PathBuf>>(name: N, image_path: P) -> Self {
        Self {
            name: name.into(),
            image_path: image_path.into(),
            ssh_host: String::new(),
            ssh_user: String::new(),
            ssh_key_path: PathBuf::new(),
        }
    }

    /// Set SSH host, user and key path
    pub fn with_ssh<H, U, K>(mut self, host: H, user: U, key_path: K) -> Self
    where
        H: Into<String>,
        U: Into<String>,
        K: Into<PathBuf>,
    {
        self.ssh_host = host.into();
        self.ssh_user = user.into();
        self.ssh_key_path = key_path.into();
        self
    }

    /// `user@host`, used in prompts and log lines
    pub fn login(&self) -> String {
        format!("{}@{}", self.ssh_user, self.ssh_host)
    }

    fn validate(&self) -> DeployResult<()> {
        if self.name.trim().is_empty() {
            return Err(DeployError::config("VM name cannot be empty"));
        }
        if self.ssh_host.trim().is_empty() {
            return Err(DeployError::config(format!(
                "VM '{}' has no ssh_host",
                self.name
            )));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(DeployError::config(format!(
                "VM '{}' has no ssh_user",
                self.name
            )));
        }
        Ok(())
    }
}

/// Longest readiness duration accepted from a config file (one day)
pub const MAX_READINESS_SECS: u64 = 24 * 60 * 60;

/// Readiness probe timings in whole seconds, as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            interval_secs: default_interval_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl ReadinessSettings {
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::new(Duration::from_secs(self.timeout_secs))
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_interval_secs() -> u64 {
    2
}

fn default_attempt_timeout_secs() -> u64 {
    5
}

fn default_ssh_port() -> u16 {
    22
}

fn default_log_file() -> PathBuf {
    PathBuf::from("deploy.log")
}

/// Top-level deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Hypervisor control executable (vmrun)
    pub hypervisor_executable: PathBuf,

    /// Persistent log file every step is appended to
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Abort the run when the pre-deployment snapshot cannot be taken.
    /// Off by default: a failed snapshot only logs and the run proceeds.
    #[serde(default)]
    pub require_snapshot: bool,

    /// SSH port probed and connected to on every VM
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// OpenSSH known_hosts file; when absent any host key is accepted
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,

    #[serde(default)]
    pub readiness: ReadinessSettings,

    #[serde(default)]
    pub vms: Vec<VmDescriptor>,
}

impl DeployConfig {
    /// Create a configuration for the given hypervisor executable
    pub fn new<P: Into<PathBuf>>(hypervisor_executable: P) -> Self {
        Self {
            hypervisor_executable: hypervisor_executable.into(),
            log_file: default_log_file(),
            require_snapshot: false,
            ssh_port: default_ssh_port(),
            known_hosts_file: None,
            readiness: ReadinessSettings::default(),
            vms: Vec::new(),
        }
    }

    pub fn with_vm(mut self, vm: VmDescriptor) -> Self {
        self.vms.push(vm);
        self
    }

    pub fn with_log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn with_require_snapshot(mut self, required: bool) -> Self {
        self.require_snapshot = required;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessSettings) -> Self {
        self.readiness = readiness;
        self
    }

    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> DeployResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> DeployResult<Self> {
        let mut config: DeployConfig = toml::from_str(content)
            .map_err(|e| DeployError::config(format!("malformed TOML: {e}")))?;

        let home = std::env::var_os("HOME").map(PathBuf::from);
        for vm in &mut config.vms {
            vm.ssh_key_path = expand_home(&vm.ssh_key_path, home.as_deref());
        }
        if let Some(known_hosts) = &config.known_hosts_file {
            config.known_hosts_file = Some(expand_home(known_hosts, home.as_deref()));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DeployResult<()> {
        if self.vms.is_empty() {
            return Err(DeployError::config("at least one [[vms]] entry is required"));
        }

        let mut seen = HashSet::new();
        for vm in &self.vms {
            vm.validate()?;
            if !seen.insert(vm.name.as_str()) {
                return Err(DeployError::config(format!(
                    "duplicate VM name '{}'",
                    vm.name
                )));
            }
        }

        let r = &self.readiness;
        let durations = [r.timeout_secs, r.interval_secs, r.attempt_timeout_secs];
        if durations.contains(&0) {
            return Err(DeployError::config("readiness durations must be non-zero"));
        }
        if durations.iter().any(|&secs| secs > MAX_READINESS_SECS) {
            return Err(DeployError::config(format!(
                "readiness durations must not exceed {MAX_READINESS_SECS} seconds"
            )));
        }

        Ok(())
    }

    /// Look up a VM by name
    pub fn vm(&self, name: &str) -> DeployResult<&VmDescriptor> {
        self.vms
            .iter()
            .find(|vm| vm.name == name)
            .ok_or_else(|| DeployError::config(format!("no VM named '{name}'")))
    }

    /// The first configured VM
    pub fn default_vm(&self) -> DeployResult<&VmDescriptor> {
        self.vms
            .first()
            .ok_or_else(|| DeployError::config("no VMs configured"))
    }

    pub fn probe_config(&self) -> ProbeConfig {
        self.readiness.probe_config()
    }
}

/// Expand a leading `~/` against the given home directory
fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
