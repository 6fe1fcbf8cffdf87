// ============================================================================
// File: src/remote/mod.rs
// ----------------------------------------------------------------------------
// Remote execution: one authenticated session per operation, command
// results, and whole-file transfer.
// ============================================================================

mod keys;
mod ssh;

pub use keys::{KeyFormat, KeyInfo, KeyProbe, load_key_file, probe_key};
pub use ssh::{HostKeyPolicy, SftpChannel, SshConnector, SshSession};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::VmDescriptor;
use crate::credential::Credential;
use crate::error::DeployResult;

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, when the server reported one
    pub exit_status: Option<i32>,
}

impl CommandResult {
    pub fn new<O: Into<String>, E: Into<String>>(stdout: O, stderr: E) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status: None,
        }
    }

    pub fn with_exit_status(mut self, status: i32) -> Self {
        self.exit_status = Some(status);
        self
    }

    /// True unless the server reported a non-zero exit status
    pub fn exited_cleanly(&self) -> bool {
        self.exit_status.is_none_or(|status| status == 0)
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Decode remote output for display, replacing invalid UTF-8
pub fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Whole-file transfer over an open session
pub trait FileChannel {
    /// Copy a local file to the remote path, returning bytes written
    fn put(&mut self, local: &Path, remote: &Path) -> DeployResult<u64>;

    /// Copy a remote file to the local path, returning bytes written
    fn get(&mut self, remote: &Path, local: &Path) -> DeployResult<u64>;
}

/// A live, authenticated channel to one VM
///
/// Owned by exactly one operation; closing twice is harmless.
pub trait RemoteSession: Send {
    /// Run one command line and wait for it to finish
    ///
    /// No timeout is applied: a command that never exits blocks the caller.
    fn run(&mut self, command: &str) -> DeployResult<CommandResult>;

    /// Open a file-transfer channel on this session
    fn open_file_channel(&mut self) -> DeployResult<Box<dyn FileChannel + '_>>;

    /// Release the underlying transport
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn upload(&mut self, local: &Path, remote: &Path) -> DeployResult<u64> {
        self.open_file_channel()?.put(local, remote)
    }

    fn download(&mut self, remote: &Path, local: &Path) -> DeployResult<u64> {
        self.open_file_channel()?.get(remote, local)
    }
}

/// Opens remote sessions
pub trait SessionConnector: Send + Sync {
    type Session: RemoteSession;

    /// Authenticate against the VM
    ///
    /// With no credential an encrypted key triggers the connector's
    /// passphrase prompt. Any failure is terminal for the calling
    /// operation.
    fn open(
        &self,
        vm: &VmDescriptor,
        credential: Option<&Credential>,
    ) -> DeployResult<Self::Session>;
}
