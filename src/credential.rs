// ============================================================================
// File: src/credential.rs
// ----------------------------------------------------------------------------
// Private-key passphrase handling. A credential is captured when an
// operation is invoked and lives only as long as that operation.
// ============================================================================

use std::fmt;
use std::io;

use crate::config::VmDescriptor;
use crate::error::{DeployError, DeployResult};

/// Passphrase for the VM's private key
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    passphrase: String,
}

impl Credential {
    pub fn new<P: Into<String>>(passphrase: P) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    /// Read a credential from an environment variable, if set
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var).ok().map(Self::new)
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn is_empty(&self) -> bool {
        self.passphrase.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        // Overwrite in place; the allocation is released right after.
        let len = self.passphrase.len();
        self.passphrase.clear();
        self.passphrase.extend(std::iter::repeat_n('\0', len));
        self.passphrase.clear();
    }
}

/// Side channel used when an encrypted key is opened without a credential
pub trait PassphrasePrompt: Send + Sync {
    fn prompt(&self, vm: &VmDescriptor) -> DeployResult<Credential>;
}

/// Prompt that reads from the controlling terminal with echo disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn prompt(&self, vm: &VmDescriptor) -> DeployResult<Credential> {
        passphrase_from_input(rpassword::prompt_password(format!(
            "Passphrase for {}: ",
            vm.login()
        )))
    }
}

/// Turn one line read from the terminal into a credential
///
/// A closed or empty input is an authentication failure.
fn passphrase_from_input(input: io::Result<String>) -> DeployResult<Credential> {
    let mut line = match input {
        Ok(line) => line,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => String::new(),
        Err(e) => return Err(DeployError::auth(format!("cannot read passphrase: {e}"))),
    };

    let passphrase = line.trim_end_matches(['\r', '\n']).to_string();
    line.clear();
    if passphrase.is_empty() {
        return Err(DeployError::auth("no passphrase entered"));
    }
    Ok(Credential::new(passphrase))
}

/// Prompt that always fails; for non-interactive callers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl PassphrasePrompt for NoPrompt {
    fn prompt(&self, vm: &VmDescriptor) -> DeployResult<Credential> {
        Err(DeployError::auth(format!(
            "key for {} is encrypted and no passphrase was supplied",
            vm.login()
        )))
    }
}
