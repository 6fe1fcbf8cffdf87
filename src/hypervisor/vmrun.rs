// ============================================================================
// File: src/hypervisor/vmrun.rs
// ----------------------------------------------------------------------------
// Hypervisor implementation backed by the `vmrun` control executable.
// ============================================================================

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Local;
use log::{debug, error, info};

use crate::config::VmDescriptor;
use crate::error::{DeployError, DeployResult};

use super::Hypervisor;
use super::snapshots::{SnapshotHandle, auto_snapshot_name, parse_snapshot_list};

/// Locate the control executable
///
/// A path with a directory component must exist as given; a bare program
/// name is looked up on `PATH`.
pub fn resolve_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        return executable.is_file().then(|| executable.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

/// Drives VMware's `vmrun`
#[derive(Debug, Clone)]
pub struct VmrunHypervisor {
    executable: PathBuf,
}

impl VmrunHypervisor {
    pub fn new<P: Into<PathBuf>>(executable: P) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run the executable once and return its stdout
    fn invoke(&self, operation: &'static str, args: &[&OsStr]) -> DeployResult<String> {
        let Some(executable) = resolve_executable(&self.executable) else {
            error!(
                "{} skipped: hypervisor executable not found at {}",
                operation,
                self.executable.display()
            );
            return Err(DeployError::ToolMissing {
                path: self.executable.clone(),
            });
        };

        debug!("Running {} {:?}", executable.display(), args);

        let output = Command::new(&executable)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                error!("{} could not spawn {}: {}", operation, executable.display(), e);
                DeployError::ProcessFailure {
                    operation,
                    details: format!("failed to spawn {}: {}", executable.display(), e),
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let details = format!(
                "exit code {:?}: {}",
                output.status.code(),
                first_non_empty(&stderr, &stdout)
            );
            error!("{} failed: {}", operation, details);
            return Err(DeployError::ProcessFailure { operation, details });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    let a = a.trim();
    if a.is_empty() { b.trim() } else { a }
}

impl Hypervisor for VmrunHypervisor {
    fn start(&self, vm: &VmDescriptor) -> DeployResult<()> {
        info!("Starting VM: {}", vm.name);
        self.invoke(
            "start",
            &[OsStr::new("start"), vm.image_path.as_os_str(), OsStr::new("gui")],
        )?;
        info!("Hypervisor accepted start of {}", vm.name);
        Ok(())
    }

    fn stop_soft(&self, vm: &VmDescriptor) -> DeployResult<()> {
        info!("Stopping VM: {}", vm.name);
        self.invoke(
            "stop",
            &[OsStr::new("stop"), vm.image_path.as_os_str(), OsStr::new("soft")],
        )?;
        info!("VM {} stopped", vm.name);
        Ok(())
    }

    fn snapshot(&self, vm: &VmDescriptor) -> DeployResult<SnapshotHandle> {
        let name = auto_snapshot_name(Local::now());
        self.invoke(
            "snapshot",
            &[
                OsStr::new("snapshot"),
                vm.image_path.as_os_str(),
                OsStr::new(&name),
            ],
        )?;
        info!("Snapshot created: {}", name);
        Ok(SnapshotHandle::new(name))
    }

    fn list_snapshots(&self, vm: &VmDescriptor) -> DeployResult<Vec<SnapshotHandle>> {
        let output = self.invoke(
            "listSnapshots",
            &[OsStr::new("listSnapshots"), vm.image_path.as_os_str()],
        )?;
        let snapshots = parse_snapshot_list(&output);
        debug!("{} has {} snapshot(s)", vm.name, snapshots.len());
        Ok(snapshots)
    }

    fn revert(&self, vm: &VmDescriptor, snapshot: &SnapshotHandle) -> DeployResult<()> {
        self.invoke(
            "revertToSnapshot",
            &[
                OsStr::new("revertToSnapshot"),
                vm.image_path.as_os_str(),
                OsStr::new(snapshot.name()),
            ],
        )?;
        info!("Reverted {} to snapshot: {}", vm.name, snapshot);
        Ok(())
    }
}
