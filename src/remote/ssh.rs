// ============================================================================
// File: src/remote/ssh.rs
// ----------------------------------------------------------------------------
// ssh2-backed sessions: key-based authentication, command execution and SFTP
// transfer.
// ============================================================================

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};

use crate::config::{DeployConfig, VmDescriptor};
use crate::credential::{Credential, PassphrasePrompt, TerminalPrompt};
use crate::error::{DeployError, DeployResult};

use super::keys::load_key_file;
use super::{CommandResult, FileChannel, RemoteSession, SessionConnector, decode_output};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the server's host key is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents
    AcceptAny,
    /// Require a matching entry in an OpenSSH `known_hosts` file
    KnownHosts(PathBuf),
}

/// Opens [`SshSession`]s
pub struct SshConnector {
    port: u16,
    host_keys: HostKeyPolicy,
    prompt: Arc<dyn PassphrasePrompt>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            host_keys: HostKeyPolicy::AcceptAny,
            prompt: Arc::new(TerminalPrompt),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Connector using the configured port and known-hosts file
    pub fn from_config(config: &DeployConfig) -> Self {
        let connector = Self::new(config.ssh_port);
        match &config.known_hosts_file {
            Some(path) => connector.with_host_key_policy(HostKeyPolicy::KnownHosts(path.clone())),
            None => connector,
        }
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PassphrasePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn connect_tcp(&self, host: &str) -> DeployResult<TcpStream> {
        let addrs = (host, self.port)
            .to_socket_addrs()
            .map_err(|e| DeployError::auth(format!("cannot resolve {host}: {e}")))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(DeployError::auth(match last_error {
            Some(e) => format!("TCP connection to {host}:{} failed: {e}", self.port),
            None => format!("{host} resolved to no addresses"),
        }))
    }

    fn verify_host_key(&self, session: &Session, host: &str) -> DeployResult<()> {
        let path = match &self.host_keys {
            HostKeyPolicy::AcceptAny => {
                warn!("Accepting host key of {} without verification", host);
                return Ok(());
            }
            HostKeyPolicy::KnownHosts(path) => path,
        };

        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| DeployError::auth(format!("known_hosts unavailable: {e}")))?;
        known_hosts
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                DeployError::auth(format!("cannot read {}: {}", path.display(), e))
            })?;

        let (key, _) = session
            .host_key()
            .ok_or_else(|| DeployError::auth("server presented no host key"))?;

        match known_hosts.check_port(host, self.port, key) {
            CheckResult::Match => {
                debug!("Host key for {} matches {}", host, path.display());
                Ok(())
            }
            CheckResult::Mismatch => Err(DeployError::auth(format!(
                "host key for {host} does not match {}",
                path.display()
            ))),
            CheckResult::NotFound => Err(DeployError::auth(format!(
                "no entry for {host} in {}",
                path.display()
            ))),
            CheckResult::Failure => Err(DeployError::auth(format!(
                "host key check for {host} failed"
            ))),
        }
    }
}

impl SessionConnector for SshConnector {
    type Session = SshSession;

    fn open(
        &self,
        vm: &VmDescriptor,
        credential: Option<&Credential>,
    ) -> DeployResult<SshSession> {
        let key = load_key_file(&vm.ssh_key_path)?;

        let credential = credential.filter(|c| !c.is_empty());
        let prompted = match (credential, key.encrypted) {
            (None, true) => Some(self.prompt.prompt(vm)?),
            _ => None,
        };
        let passphrase = credential
            .or(prompted.as_ref())
            .map(Credential::passphrase);

        let tcp = self.connect_tcp(&vm.ssh_host)?;

        let mut session = Session::new()
            .map_err(|e| DeployError::auth(format!("failed to create SSH session: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(self.connect_timeout));
        session
            .handshake()
            .map_err(|e| DeployError::auth(format!("SSH handshake failed: {e}")))?;

        self.verify_host_key(&session, &vm.ssh_host)?;

        session
            .userauth_pubkey_file(&vm.ssh_user, None, &vm.ssh_key_path, passphrase)
            .map_err(|e| {
                error!("SSH authentication as {} failed: {}", vm.login(), e);
                DeployError::auth(format!("{} key rejected for {}: {}", key.format, vm.login(), e))
            })?;

        if !session.authenticated() {
            return Err(DeployError::auth(format!(
                "authentication for {} did not complete",
                vm.login()
            )));
        }

        // Commands run without a deadline once authenticated.
        session.set_timeout(0);

        info!("Connected via SSH to {}", vm.ssh_host);
        Ok(SshSession {
            session: Some(session),
            peer: vm.login(),
        })
    }
}

/// An authenticated SSH session
pub struct SshSession {
    session: Option<Session>,
    peer: String,
}

impl SshSession {
    fn live(&self, operation: &'static str) -> DeployResult<&Session> {
        self.session.as_ref().ok_or_else(|| DeployError::ProcessFailure {
            operation,
            details: format!("session to {} is closed", self.peer),
        })
    }
}

impl RemoteSession for SshSession {
    fn run(&mut self, command: &str) -> DeployResult<CommandResult> {
        let session = self.live("remote exec")?;

        let mut channel = session.channel_session().map_err(|e| exec_error(command, &e))?;
        channel.exec(command).map_err(|e| exec_error(command, &e))?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout).map_err(|e| exec_error(command, &e))?;

        let mut stderr = Vec::new();
        channel
            .stderr()
            .read_to_end(&mut stderr)
            .map_err(|e| exec_error(command, &e))?;

        channel.wait_close().map_err(|e| exec_error(command, &e))?;
        let exit_status = channel.exit_status().ok();

        debug!("{} exited with {:?}", command, exit_status);
        Ok(CommandResult {
            stdout: decode_output(&stdout),
            stderr: decode_output(&stderr),
            exit_status,
        })
    }

    fn open_file_channel(&mut self) -> DeployResult<Box<dyn FileChannel + '_>> {
        let sftp = self
            .live("sftp")?
            .sftp()
            .map_err(|e| DeployError::transfer(format!("failed to open SFTP channel: {e}")))?;
        Ok(Box::new(SftpChannel { sftp }))
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect(None, "closing", None) {
                debug!("Disconnect from {} reported: {}", self.peer, e);
            }
            info!("SSH session to {} closed", self.peer);
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn exec_error(command: &str, e: &dyn fmt::Display) -> DeployError {
    DeployError::ProcessFailure {
        operation: "remote exec",
        details: format!("{command}: {e}"),
    }
}

/// SFTP-backed [`FileChannel`]
pub struct SftpChannel {
    sftp: Sftp,
}

impl FileChannel for SftpChannel {
    fn put(&mut self, local: &Path, remote: &Path) -> DeployResult<u64> {
        let mut source = File::open(local).map_err(|e| {
            DeployError::transfer(format!("cannot open {}: {}", local.display(), e))
        })?;
        let mut target = self.sftp.create(remote).map_err(|e| {
            DeployError::transfer(format!("cannot create remote {}: {}", remote.display(), e))
        })?;

        let bytes = io::copy(&mut source, &mut target).map_err(|e| {
            DeployError::transfer(format!("upload to {} failed: {}", remote.display(), e))
        })?;
        info!("Uploaded {} -> {} ({} bytes)", local.display(), remote.display(), bytes);
        Ok(bytes)
    }

    fn get(&mut self, remote: &Path, local: &Path) -> DeployResult<u64> {
        let mut source = self.sftp.open(remote).map_err(|e| {
            DeployError::transfer(format!("cannot open remote {}: {}", remote.display(), e))
        })?;
        let mut target = File::create(local).map_err(|e| {
            DeployError::transfer(format!("cannot create {}: {}", local.display(), e))
        })?;

        let bytes = io::copy(&mut source, &mut target).map_err(|e| {
            DeployError::transfer(format!("download of {} failed: {}", remote.display(), e))
        })?;
        info!("Downloaded {} -> {} ({} bytes)", remote.display(), local.display(), bytes);
        Ok(bytes)
    }
}

/// libssh2 takes a millisecond timeout as `u32`; longer values saturate
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}
