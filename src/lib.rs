//! Snapshot-guarded deployment of a single VM over SSH.
//!
//! A run takes a snapshot, boots the VM through `vmrun`, waits for the SSH
//! port, runs a fixed provisioning sequence and either commits or reverts
//! to the snapshot. [`facade::Operations`] adds the one-shot remote actions
//! (status, transfers, service control) around the same primitives.

pub mod config;
pub mod credential;
pub mod deploy;
pub mod error;
pub mod facade;
pub mod hypervisor;
pub mod logging;
pub mod readiness;
pub mod remote;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{DeployConfig, ReadinessSettings, VmDescriptor};
pub use credential::{Credential, NoPrompt, PassphrasePrompt, TerminalPrompt};
pub use deploy::{
    DeployReport, DeployState, DeploymentOutcome, Orchestrator, OutputClassifier, RollbackOutcome,
};
pub use error::{DeployError, DeployResult};
pub use facade::{AsyncOperations, Operations, ServiceAction, ServiceReport};
pub use hypervisor::{Hypervisor, SnapshotHandle, VmrunHypervisor};
pub use readiness::{PortProber, ProbeConfig, TcpProber};
pub use remote::{CommandResult, RemoteSession, SessionConnector, SshConnector};
pub use task::AsyncTask;
