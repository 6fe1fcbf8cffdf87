// ============================================================================
// File: src/deploy/orchestrator.rs
// ----------------------------------------------------------------------------
// Snapshot, boot, wait for SSH, connect, provision, then commit or roll
// back. Stage failures become outcomes, never errors.
// ============================================================================

use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{DeployConfig, VmDescriptor};
use crate::credential::Credential;
use crate::error::{DeployError, DeployResult};
use crate::hypervisor::{Hypervisor, SnapshotHandle};
use crate::readiness::{PortProber, ProbeConfig, TcpProber};
use crate::remote::{RemoteSession, SessionConnector};

use super::classifier::{KeywordClassifier, OutputClassifier, Verdict};
use super::run_lock::RunLock;
use super::state::{DeployState, DeploymentOutcome, StateTracker};
use super::steps::{ProvisioningStep, StepRecord, default_provisioning_steps};

/// Result of a rollback attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rollback", content = "detail")]
pub enum RollbackOutcome {
    /// The VM was reverted to this snapshot
    Reverted(SnapshotHandle),
    /// No handle was given and the VM has no snapshots
    NoSnapshot,
    /// The hypervisor refused or failed the revert
    RevertFailed(String),
}

impl RollbackOutcome {
    pub fn is_reverted(&self) -> bool {
        matches!(self, RollbackOutcome::Reverted(_))
    }
}

/// Everything recorded about one deployment run
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub run_id: Uuid,
    pub vm: String,
    /// Snapshot taken before the VM was started, if that succeeded
    pub snapshot: Option<SnapshotHandle>,
    pub outcome: DeploymentOutcome,
    pub transitions: Vec<DeployState>,
    pub executed: Vec<StepRecord>,
    pub rollback: Option<RollbackOutcome>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl DeployReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Commands that ran, in order
    pub fn executed_commands(&self) -> Vec<&str> {
        self.executed
            .iter()
            .map(|record| record.step.command.as_str())
            .collect()
    }
}

/// In-flight bookkeeping for one run
struct RunRecorder {
    run_id: Uuid,
    vm: String,
    started_at: DateTime<Local>,
    states: StateTracker,
    snapshot: Option<SnapshotHandle>,
    executed: Vec<StepRecord>,
    rollback: Option<RollbackOutcome>,
}

impl RunRecorder {
    fn new(vm: &VmDescriptor) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            vm: vm.name.clone(),
            started_at: Local::now(),
            states: StateTracker::new(),
            snapshot: None,
            executed: Vec::new(),
            rollback: None,
        }
    }

    fn advance(&mut self, next: DeployState) {
        self.states.advance(next);
    }

    fn abort(self, reason: String) -> DeployReport {
        error!("Deployment of {} aborted: {}", self.vm, reason);
        self.finish(DeploymentOutcome::Aborted(reason))
    }

    fn finish(mut self, outcome: DeploymentOutcome) -> DeployReport {
        self.states.advance(DeployState::Terminal);
        info!("Deployment run {} on {} finished: {}", self.run_id, self.vm, outcome);
        DeployReport {
            run_id: self.run_id,
            vm: self.vm,
            snapshot: self.snapshot,
            outcome,
            transitions: self.states.into_history(),
            executed: self.executed,
            rollback: self.rollback,
            started_at: self.started_at,
            finished_at: Local::now(),
        }
    }
}

/// Runs the deployment protocol against one VM at a time
pub struct Orchestrator<H, C> {
    hypervisor: Arc<H>,
    connector: Arc<C>,
    prober: Arc<dyn PortProber>,
    classifier: Arc<dyn OutputClassifier>,
    steps: Vec<ProvisioningStep>,
    probe: ProbeConfig,
    ssh_port: u16,
    require_snapshot: bool,
    locks: RunLock,
}

impl<H, C> Orchestrator<H, C>
where
    H: Hypervisor,
    C: SessionConnector,
{
    pub fn new(hypervisor: Arc<H>, connector: Arc<C>) -> Self {
        Self {
            hypervisor,
            connector,
            prober: Arc::new(TcpProber),
            classifier: Arc::new(KeywordClassifier::default()),
            steps: default_provisioning_steps(),
            probe: ProbeConfig::default(),
            ssh_port: 22,
            require_snapshot: false,
            locks: RunLock::new(),
        }
    }

    /// Orchestrator using the port, probe timings and snapshot policy of
    /// `config`
    pub fn from_config(config: &DeployConfig, hypervisor: Arc<H>, connector: Arc<C>) -> Self {
        Self::new(hypervisor, connector)
            .with_ssh_port(config.ssh_port)
            .with_probe_config(config.probe_config())
            .with_require_snapshot(config.require_snapshot)
    }

    pub fn with_prober(mut self, prober: Arc<dyn PortProber>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_steps(mut self, steps: Vec<ProvisioningStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_probe_config(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    pub fn with_require_snapshot(mut self, required: bool) -> Self {
        self.require_snapshot = required;
        self
    }

    /// Share a run lock with other orchestrators or the façade
    pub fn with_run_lock(mut self, locks: RunLock) -> Self {
        self.locks = locks;
        self
    }

    pub fn run_lock(&self) -> &RunLock {
        &self.locks
    }

    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }

    /// Run the full deployment protocol
    ///
    /// Rollback only follows a provisioning failure. Failures before
    /// provisioning abort the run and leave the VM as it is, even when a
    /// snapshot was taken.
    pub fn deploy(&self, vm: &VmDescriptor, credential: Option<Credential>) -> DeployReport {
        let mut run = RunRecorder::new(vm);
        info!("Deployment run {} started for {}", run.run_id, vm.name);

        let _guard = match self.locks.try_acquire(&vm.name) {
            Ok(guard) => guard,
            Err(e) => return run.abort(e.to_string()),
        };

        match self.hypervisor.snapshot(vm) {
            Ok(handle) => run.snapshot = Some(handle),
            Err(e) if self.require_snapshot => {
                return run.abort(format!("snapshot required but failed: {e}"));
            }
            Err(e) => warn!("Snapshot failed, continuing without a restore point: {}", e),
        }
        if run.snapshot.is_none() {
            warn!("Run {} passes the snapshot stage with no snapshot", run.run_id);
        }
        run.advance(DeployState::SnapshotTaken);

        if let Err(e) = self.hypervisor.start(vm) {
            return run.abort(format!("VM start failed: {e}"));
        }
        run.advance(DeployState::VmStarted);

        if !self
            .prober
            .wait_for_port(&vm.ssh_host, self.ssh_port, &self.probe)
        {
            let timeout = DeployError::NetworkTimeout {
                host: vm.ssh_host.clone(),
                port: self.ssh_port,
                seconds: self.probe.timeout.as_secs(),
            };
            return run.abort(timeout.to_string());
        }
        run.advance(DeployState::SshReady);

        let mut session = match self.connector.open(vm, credential.as_ref()) {
            Ok(session) => session,
            Err(e) => return run.abort(format!("SSH connection failed: {e}")),
        };
        drop(credential);
        run.advance(DeployState::Connected);

        run.advance(DeployState::Provisioning);
        let failure = self.provision(&mut session, &mut run.executed);
        session.close();

        match failure {
            None => {
                run.advance(DeployState::Succeeded);
                info!("Deployment completed successfully");
                run.finish(DeploymentOutcome::Succeeded)
            }
            Some(reason) => {
                error!("Deployment failed: {}", reason);
                run.advance(DeployState::RollingBack);
                run.rollback = Some(self.revert_to(vm, run.snapshot.clone()));
                run.finish(DeploymentOutcome::Failed(reason))
            }
        }
    }

    /// Run each step in order, stopping at the first failure
    fn provision(&self, session: &mut C::Session, executed: &mut Vec<StepRecord>) -> Option<String> {
        for step in &self.steps {
            info!("Running: {}", step.command);

            let result = match session.run(&step.command) {
                Ok(result) => result,
                Err(e) => return Some(format!("{}: {}", step.label, e)),
            };

            if !result.stdout.is_empty() {
                info!("{}", result.stdout.trim_end());
            }
            if !result.stderr.is_empty() {
                warn!("{}", result.stderr.trim_end());
            }

            let verdict = self.classifier.classify(step, &result);
            let failure = match &verdict {
                Verdict::Pass => None,
                Verdict::Fail(details) => Some(
                    DeployError::RemoteCommandSignaledError {
                        command: step.command.clone(),
                        details: details.clone(),
                    }
                    .to_string(),
                ),
            };

            executed.push(StepRecord {
                step: step.clone(),
                result,
                verdict,
            });

            if let Some(reason) = failure {
                return Some(reason);
            }
        }
        None
    }

    /// Revert the VM, holding the run lock for the duration
    ///
    /// With no handle the latest snapshot is used.
    pub fn rollback(
        &self,
        vm: &VmDescriptor,
        snapshot: Option<SnapshotHandle>,
    ) -> DeployResult<RollbackOutcome> {
        let _guard = self.locks.try_acquire(&vm.name)?;
        Ok(self.revert_to(vm, snapshot))
    }

    fn revert_to(&self, vm: &VmDescriptor, snapshot: Option<SnapshotHandle>) -> RollbackOutcome {
        let handle = match snapshot {
            Some(handle) => handle,
            None => match self.hypervisor.latest_snapshot(vm) {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    error!("No snapshot available to roll back {}", vm.name);
                    return RollbackOutcome::NoSnapshot;
                }
                Err(e) => return RollbackOutcome::RevertFailed(e.to_string()),
            },
        };

        info!("Rolling back {} to snapshot: {}", vm.name, handle);
        match self.hypervisor.revert(vm, &handle) {
            Ok(()) => RollbackOutcome::Reverted(handle),
            Err(e) => {
                error!("Rollback of {} failed: {}", vm.name, e);
                RollbackOutcome::RevertFailed(e.to_string())
            }
        }
    }
}
