// ============================================================================
// File: src/facade/mod.rs
// ----------------------------------------------------------------------------
// One method per user action. Every remote action opens its own session,
// does one thing and closes it; VM-changing actions go through the
// orchestrator and its run lock.
// ============================================================================

mod service;
mod status;

pub use service::{ServiceAction, ServiceReport, service_command, validate_service_name};
pub use status::{STATUS_SECTIONS, StatusSection, collect_status};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};

use crate::config::{DeployConfig, VmDescriptor};
use crate::credential::Credential;
use crate::deploy::{DeployReport, Orchestrator, RollbackOutcome};
use crate::error::{DeployError, DeployResult};
use crate::hypervisor::{Hypervisor, SnapshotHandle};
use crate::logging::read_log;
use crate::readiness::{PortProber, TcpProber};
use crate::remote::{CommandResult, RemoteSession, SessionConnector};
use crate::task::{AsyncTask, AsyncTaskBuilder};

/// Page opened by [`Operations::open_webpage`] when no URL is given
pub const DEFAULT_URL: &str = "https://www.google.se";

/// Synchronous operation surface
pub struct Operations<H, C> {
    config: DeployConfig,
    hypervisor: Arc<H>,
    connector: Arc<C>,
    prober: Arc<dyn PortProber>,
    orchestrator: Orchestrator<H, C>,
}

impl<H, C> Operations<H, C>
where
    H: Hypervisor,
    C: SessionConnector,
{
    pub fn new(config: DeployConfig, hypervisor: Arc<H>, connector: Arc<C>) -> Self {
        let orchestrator =
            Orchestrator::from_config(&config, Arc::clone(&hypervisor), Arc::clone(&connector));
        Self {
            config,
            hypervisor,
            connector,
            prober: Arc::new(TcpProber),
            orchestrator,
        }
    }

    /// Replace the readiness prober for connectivity tests and deploys
    pub fn with_prober(mut self, prober: Arc<dyn PortProber>) -> Self {
        self.orchestrator = self.orchestrator.with_prober(Arc::clone(&prober));
        self.prober = prober;
        self
    }

    /// Adjust the orchestrator (classifier, steps, ...)
    pub fn map_orchestrator<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Orchestrator<H, C>) -> Orchestrator<H, C>,
    {
        self.orchestrator = f(self.orchestrator);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator<H, C> {
        &self.orchestrator
    }

    /// Named VM, or the first configured one
    pub fn vm(&self, name: Option<&str>) -> DeployResult<&VmDescriptor> {
        match name {
            Some(name) => self.config.vm(name),
            None => self.config.default_vm(),
        }
    }

    /// Open a session, run `f`, and close the session on every path
    fn with_session<T, F>(
        &self,
        operation: &'static str,
        vm: &VmDescriptor,
        credential: Option<Credential>,
        f: F,
    ) -> DeployResult<T>
    where
        F: FnOnce(&mut C::Session) -> DeployResult<T>,
    {
        let mut session = self.connector.open(vm, credential.as_ref()).inspect_err(|e| {
            error!("{} on {}: connection failed: {}", operation, vm.name, e);
        })?;
        drop(credential);

        let result = f(&mut session);
        session.close();

        if let Err(e) = &result {
            error!("{} on {} failed: {}", operation, vm.name, e);
        }
        result
    }

    /// Wait for the SSH port, then open and close a session
    pub fn test_connectivity(
        &self,
        vm: &VmDescriptor,
        credential: Option<Credential>,
    ) -> DeployResult<()> {
        let probe = self.config.probe_config();
        if !self
            .prober
            .wait_for_port(&vm.ssh_host, self.config.ssh_port, &probe)
        {
            let err = DeployError::NetworkTimeout {
                host: vm.ssh_host.clone(),
                port: self.config.ssh_port,
                seconds: probe.timeout.as_secs(),
            };
            error!("SSH test on {} failed: {}", vm.name, err);
            return Err(err);
        }

        self.with_session("SSH test", vm, credential, |_| Ok(()))?;
        info!("SSH test succeeded for {}", vm.login());
        Ok(())
    }

    /// Six-section diagnostic report
    pub fn system_status(
        &self,
        vm: &VmDescriptor,
        credential: Option<Credential>,
    ) -> DeployResult<String> {
        self.with_session("status", vm, credential, |session| collect_status(session))
    }

    pub fn upload_file(
        &self,
        vm: &VmDescriptor,
        credential: Option<Credential>,
        local: &Path,
        remote: &Path,
    ) -> DeployResult<u64> {
        self.with_session("upload", vm, credential, |session| {
            session.upload(local, remote)
        })
    }

    pub fn download_file(
        &self,
        vm: &VmDescriptor,
        credential: Option<Credential>,
        remote: &Path,
        local: &Path,
    ) -> DeployResult<u64> {
        self.with_session("download", vm, credential, |session| {
            session.download(remote, local)
        })
    }

    /// `systemctl <action> <service>`, output returned raw
    pub fn manage_service(
        &self,
        vm: &VmDescriptor,
        credential: Option<Credential>,
        service: &str,
        action: ServiceAction,
    ) -> DeployResult<ServiceReport> {
        let command = service_command(service, action)?;
        self.with_session("service", vm, credential, |session| {
            let result = session.run(&command)?;
            info!(
                "Service [{}] {}:\nSTDOUT:\n{}\nSTDERR:\n{}",
                service, action, result.stdout, result.stderr
            );
            Ok(ServiceReport {
                stdout: result.stdout,
                stderr: result.stderr,
            })
        })
    }

    /// Launch Firefox on the guest's display
    pub fn open_webpage(
        &self,
        vm: &VmDescriptor,
        credential: Option<Credential>,
        url: Option<&str>,
    ) -> DeployResult<CommandResult> {
        let url = url.unwrap_or(DEFAULT_URL);
        validate_url(url)?;
        let command = format!("DISPLAY=:0 firefox \"{url}\" &");

        self.with_session("open webpage", vm, credential, |session| {
            let result = session.run(&command)?;
            info!(
                "Opening {} in VM\nstdout: {}\nstderr: {}",
                url, result.stdout, result.stderr
            );
            Ok(result)
        })
    }

    pub fn shutdown_vm(&self, vm: &VmDescriptor) -> DeployResult<()> {
        self.hypervisor.stop_soft(vm)
    }

    pub fn list_snapshots(&self, vm: &VmDescriptor) -> DeployResult<Vec<SnapshotHandle>> {
        self.hypervisor.list_snapshots(vm)
    }

    pub fn deploy(&self, vm: &VmDescriptor, credential: Option<Credential>) -> DeployReport {
        self.orchestrator.deploy(vm, credential)
    }

    pub fn rollback(
        &self,
        vm: &VmDescriptor,
        snapshot: Option<SnapshotHandle>,
    ) -> DeployResult<RollbackOutcome> {
        self.orchestrator.rollback(vm, snapshot)
    }

    /// Contents of the configured log file
    pub fn read_log(&self) -> DeployResult<String> {
        read_log(&self.config.log_file)
    }
}

/// Only plain http(s) URLs without quoting or expansion characters
fn validate_url(url: &str) -> DeployResult<()> {
    let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
    let chars_ok = !url
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '`' | '$' | '\\'));
    if scheme_ok && chars_ok {
        Ok(())
    } else {
        Err(DeployError::config(format!("refusing to open URL '{url}'")))
    }
}

/// Task-returning wrapper: each call runs on the blocking pool and hands
/// back a handle to await
pub struct AsyncOperations<H, C> {
    inner: Arc<Operations<H, C>>,
}

impl<H, C> Clone for AsyncOperations<H, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H, C> AsyncOperations<H, C>
where
    H: Hypervisor + 'static,
    C: SessionConnector + 'static,
{
    pub fn new(operations: Operations<H, C>) -> Self {
        Self {
            inner: Arc::new(operations),
        }
    }

    pub fn operations(&self) -> &Operations<H, C> {
        &self.inner
    }

    pub fn deploy(&self, vm: VmDescriptor, credential: Option<Credential>) -> AsyncTask<DeployReport> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.deploy(&vm, credential))
            .named("deploy")
            .spawn()
    }

    pub fn rollback(
        &self,
        vm: VmDescriptor,
        snapshot: Option<SnapshotHandle>,
    ) -> AsyncTask<DeployResult<RollbackOutcome>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.rollback(&vm, snapshot))
            .named("rollback")
            .spawn()
    }

    pub fn test_connectivity(
        &self,
        vm: VmDescriptor,
        credential: Option<Credential>,
    ) -> AsyncTask<DeployResult<()>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.test_connectivity(&vm, credential))
            .named("test connectivity")
            .spawn()
    }

    pub fn system_status(
        &self,
        vm: VmDescriptor,
        credential: Option<Credential>,
    ) -> AsyncTask<DeployResult<String>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.system_status(&vm, credential))
            .named("system status")
            .spawn()
    }

    pub fn upload_file(
        &self,
        vm: VmDescriptor,
        credential: Option<Credential>,
        local: PathBuf,
        remote: PathBuf,
    ) -> AsyncTask<DeployResult<u64>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.upload_file(&vm, credential, &local, &remote))
            .named("upload")
            .spawn()
    }

    pub fn download_file(
        &self,
        vm: VmDescriptor,
        credential: Option<Credential>,
        remote: PathBuf,
        local: PathBuf,
    ) -> AsyncTask<DeployResult<u64>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.download_file(&vm, credential, &remote, &local))
            .named("download")
            .spawn()
    }

    pub fn manage_service(
        &self,
        vm: VmDescriptor,
        credential: Option<Credential>,
        service: String,
        action: ServiceAction,
    ) -> AsyncTask<DeployResult<ServiceReport>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.manage_service(&vm, credential, &service, action))
            .named("service")
            .spawn()
    }

    pub fn open_webpage(
        &self,
        vm: VmDescriptor,
        credential: Option<Credential>,
        url: Option<String>,
    ) -> AsyncTask<DeployResult<CommandResult>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.open_webpage(&vm, credential, url.as_deref()))
            .named("open webpage")
            .spawn()
    }

    pub fn shutdown_vm(&self, vm: VmDescriptor) -> AsyncTask<DeployResult<()>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.shutdown_vm(&vm))
            .named("shutdown")
            .spawn()
    }

    pub fn list_snapshots(&self, vm: VmDescriptor) -> AsyncTask<DeployResult<Vec<SnapshotHandle>>> {
        let ops = Arc::clone(&self.inner);
        AsyncTaskBuilder::new(move || ops.list_snapshots(&vm))
            .named("list snapshots")
            .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::DeploymentOutcome;
    use crate::task::join;
    use crate::test_support::{FakeConnector, FakeHypervisor, FakeProber, test_vm};

    fn operations(
        hypervisor: FakeHypervisor,
        connector: FakeConnector,
        prober: FakeProber,
    ) -> (
        Operations<FakeHypervisor, FakeConnector>,
        Arc<FakeHypervisor>,
        FakeConnector,
    ) {
        let config = DeployConfig::new("vmrun").with_vm(test_vm());
        let hypervisor = Arc::new(hypervisor);
        let ops = Operations::new(config, Arc::clone(&hypervisor), Arc::new(connector.clone()))
            .with_prober(Arc::new(prober));
        (ops, hypervisor, connector)
    }

    #[test]
    fn connectivity_test_opens_and_closes_one_session() {
        let (ops, _, connector) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());

        ops.test_connectivity(&test_vm(), None).unwrap();

        let log = connector.log();
        assert_eq!((log.opens, log.closes), (1, 1));
        assert!(log.commands.is_empty());
    }

    #[test]
    fn connectivity_test_times_out_without_connecting() {
        let (ops, _, connector) = operations(
            FakeHypervisor::new(),
            FakeConnector::new(),
            FakeProber::never_ready(),
        );

        let err = ops.test_connectivity(&test_vm(), None).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(connector.log().opens, 0);
    }

    #[test]
    fn auth_failure_is_reported() {
        let (ops, _, _) = operations(
            FakeHypervisor::new(),
            FakeConnector::new().rejecting_auth(),
            FakeProber::ready(),
        );
        let err = ops.system_status(&test_vm(), None).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn service_control_runs_systemctl_and_returns_raw_output() {
        let connector = FakeConnector::new().with_result(
            "sudo systemctl status nginx",
            CommandResult::new("active (running)", "warning: unit changed"),
        );
        let (ops, _, connector) = operations(FakeHypervisor::new(), connector, FakeProber::ready());

        let report = ops
            .manage_service(&test_vm(), None, "nginx", ServiceAction::Status)
            .unwrap();

        assert_eq!(report.stdout, "active (running)");
        assert_eq!(report.stderr, "warning: unit changed");
        assert_eq!(connector.log().closes, 1);
    }

    #[test]
    fn invalid_service_name_never_opens_a_session() {
        let (ops, _, connector) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());

        assert!(
            ops.manage_service(&test_vm(), None, "nginx;reboot", ServiceAction::Restart)
                .is_err()
        );
        assert_eq!(connector.log().opens, 0);
    }

    #[test]
    fn open_webpage_uses_default_url() {
        let (ops, _, connector) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());

        ops.open_webpage(&test_vm(), None, None).unwrap();
        ops.open_webpage(&test_vm(), None, Some("https://example.org/a?b=1"))
            .unwrap();
        assert!(
            ops.open_webpage(&test_vm(), None, Some("https://x\"; rm -rf ~ \""))
                .is_err()
        );

        assert_eq!(
            connector.log().commands,
            vec![
                "DISPLAY=:0 firefox \"https://www.google.se\" &",
                "DISPLAY=:0 firefox \"https://example.org/a?b=1\" &",
            ]
        );
    }

    #[test]
    fn transfers_go_through_the_file_channel() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("app.tar.gz");
        std::fs::write(&local, b"0123456789").unwrap();
        let fetched = dir.path().join("syslog");

        let (ops, _, connector) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());

        let sent = ops
            .upload_file(&test_vm(), None, &local, Path::new("/tmp/app.tar.gz"))
            .unwrap();
        assert_eq!(sent, 10);

        ops.download_file(&test_vm(), None, Path::new("/var/log/syslog"), &fetched)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&fetched).unwrap(),
            "contents of /var/log/syslog"
        );

        let log = connector.log();
        assert_eq!(log.uploads.len(), 1);
        assert_eq!(log.downloads.len(), 1);
        assert_eq!((log.opens, log.closes), (2, 2));
    }

    #[test]
    fn failed_upload_still_closes_session() {
        let (ops, _, connector) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());

        let err = ops
            .upload_file(
                &test_vm(),
                None,
                Path::new("/nonexistent/file"),
                Path::new("/tmp/file"),
            )
            .unwrap_err();

        assert!(matches!(err, DeployError::TransferFailure { .. }));
        assert_eq!(connector.log().closes, 1);
    }

    #[test]
    fn shutdown_and_snapshots_use_the_hypervisor() {
        let (ops, hypervisor, _) = operations(
            FakeHypervisor::new().with_snapshots(&["snap_a"]),
            FakeConnector::new(),
            FakeProber::ready(),
        );

        ops.shutdown_vm(&test_vm()).unwrap();
        let snapshots = ops.list_snapshots(&test_vm()).unwrap();

        assert_eq!(snapshots, vec![SnapshotHandle::from("snap_a")]);
        assert_eq!(hypervisor.calls(), vec!["stop", "list"]);
    }

    #[test]
    fn vm_lookup_defaults_to_first_entry() {
        let (ops, _, _) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());
        assert_eq!(ops.vm(None).unwrap().name, "ubuntu");
        assert_eq!(ops.vm(Some("ubuntu")).unwrap().name, "ubuntu");
        assert!(ops.vm(Some("nope")).is_err());
    }

    #[test]
    fn read_log_returns_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("deploy.log");
        std::fs::write(&log_path, "2024-03-09 14:05:07 INFO     Snapshot created\n").unwrap();

        let config = DeployConfig::new("vmrun")
            .with_vm(test_vm())
            .with_log_file(&log_path);
        let ops = Operations::new(
            config,
            Arc::new(FakeHypervisor::new()),
            Arc::new(FakeConnector::new()),
        );

        assert!(ops.read_log().unwrap().contains("Snapshot created"));
    }

    #[tokio::test]
    async fn async_deploy_returns_report_through_handle() {
        let (ops, _, connector) =
            operations(FakeHypervisor::new(), FakeConnector::new(), FakeProber::ready());
        let ops = AsyncOperations::new(ops);

        let report = ops.deploy(test_vm(), None).await.unwrap();

        assert_eq!(report.outcome, DeploymentOutcome::Succeeded);
        assert_eq!(connector.log().closes, 1);
    }

    #[tokio::test]
    async fn async_operations_surface_errors() {
        let (ops, _, _) = operations(
            FakeHypervisor::new(),
            FakeConnector::new().rejecting_auth(),
            FakeProber::ready(),
        );
        let ops = AsyncOperations::new(ops);

        let err = join(ops.system_status(test_vm(), None)).await.unwrap_err();
        assert!(err.is_auth_failure());

        let outcome = join(ops.rollback(test_vm(), None)).await.unwrap();
        assert_eq!(outcome, RollbackOutcome::NoSnapshot);
    }

    #[tokio::test]
    async fn async_snapshot_listing_runs_off_the_runtime() {
        let (ops, hypervisor, _) = operations(
            FakeHypervisor::new().with_snapshots(&["base", "patched"]),
            FakeConnector::new(),
            FakeProber::ready(),
        );
        let ops = AsyncOperations::new(ops);

        let snapshots = join(ops.list_snapshots(test_vm())).await.unwrap();

        assert_eq!(
            snapshots,
            vec![SnapshotHandle::from("base"), SnapshotHandle::from("patched")]
        );
        assert_eq!(hypervisor.calls(), vec!["list"]);
    }
}
