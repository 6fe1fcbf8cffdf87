// ============================================================================
// File: src/hypervisor/mod.rs
// ----------------------------------------------------------------------------
// Hypervisor control: start, stop, snapshot, list and revert one VM through
// an external control executable.
// ============================================================================

mod snapshots;
mod vmrun;

pub use snapshots::{SnapshotHandle, auto_snapshot_name, parse_snapshot_list};
pub use vmrun::{VmrunHypervisor, resolve_executable};

use crate::config::VmDescriptor;
use crate::error::DeployResult;

/// Control surface of the hypervisor
///
/// Every call blocks until the hypervisor has answered. No call retries;
/// retry policy belongs to the caller.
pub trait Hypervisor: Send + Sync {
    /// Ask the hypervisor to power on the VM
    ///
    /// Success only means the request was accepted, not that the guest OS
    /// is usable. Callers probe readiness separately.
    fn start(&self, vm: &VmDescriptor) -> DeployResult<()>;

    /// Request a guest-initiated shutdown
    fn stop_soft(&self, vm: &VmDescriptor) -> DeployResult<()>;

    /// Take a snapshot with a generated name
    fn snapshot(&self, vm: &VmDescriptor) -> DeployResult<SnapshotHandle>;

    /// Snapshots in the order the hypervisor reports them
    fn list_snapshots(&self, vm: &VmDescriptor) -> DeployResult<Vec<SnapshotHandle>>;

    /// Revert the VM's disk to a snapshot
    fn revert(&self, vm: &VmDescriptor, snapshot: &SnapshotHandle) -> DeployResult<()>;

    /// The most recent snapshot
    ///
    /// "Most recent" is the last entry of [`Hypervisor::list_snapshots`]. The
    /// executable does not document its ordering; reporting order is taken
    /// as creation order.
    fn latest_snapshot(&self, vm: &VmDescriptor) -> DeployResult<Option<SnapshotHandle>> {
        Ok(self.list_snapshots(vm)?.pop())
    }
}
