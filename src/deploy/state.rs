// ============================================================================
// File: src/deploy/state.rs
// ----------------------------------------------------------------------------
// Deployment run states, the legal edges between them, and run outcomes.
// ============================================================================

use std::fmt;

use log::{debug, error};
use serde::{Deserialize, Serialize};

/// Where a deployment run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployState {
    Init,
    /// The snapshot stage is over. The run's report says whether a
    /// snapshot actually exists; a tolerated failure also lands here.
    SnapshotTaken,
    VmStarted,
    SshReady,
    Connected,
    Provisioning,
    Succeeded,
    RollingBack,
    Terminal,
}

impl DeployState {
    /// Whether `next` may follow `self`
    ///
    /// Every pre-provisioning state may jump straight to `Terminal`
    /// (aborted run). Once provisioning starts the run ends through
    /// `Succeeded` or `RollingBack`.
    pub fn can_transition_to(self, next: DeployState) -> bool {
        use DeployState::*;
        matches!(
            (self, next),
            (Init, SnapshotTaken)
                | (SnapshotTaken, VmStarted)
                | (VmStarted, SshReady)
                | (SshReady, Connected)
                | (Connected, Provisioning)
                | (Provisioning, Succeeded)
                | (Provisioning, RollingBack)
                | (Succeeded, Terminal)
                | (RollingBack, Terminal)
                | (Init, Terminal)
                | (SnapshotTaken, Terminal)
                | (VmStarted, Terminal)
                | (SshReady, Terminal)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == DeployState::Terminal
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployState::Init => "init",
            DeployState::SnapshotTaken => "snapshot-taken",
            DeployState::VmStarted => "vm-started",
            DeployState::SshReady => "ssh-ready",
            DeployState::Connected => "connected",
            DeployState::Provisioning => "provisioning",
            DeployState::Succeeded => "succeeded",
            DeployState::RollingBack => "rolling-back",
            DeployState::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and every state visited
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: DeployState,
    history: Vec<DeployState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: DeployState::Init,
            history: vec![DeployState::Init],
        }
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> DeployState {
        self.current
    }

    pub fn history(&self) -> &[DeployState] {
        &self.history
    }

    /// Move to `next`, recording it
    pub fn advance(&mut self, next: DeployState) {
        if !self.current.can_transition_to(next) {
            error!("Unexpected state transition {} -> {}", self.current, next);
            debug_assert!(false, "illegal transition {} -> {}", self.current, next);
        }
        debug!("Deploy state {} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
    }

    pub fn into_history(self) -> Vec<DeployState> {
        self.history
    }
}

/// How a deployment run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason")]
pub enum DeploymentOutcome {
    Succeeded,
    /// A provisioning step failed; rollback was attempted
    Failed(String),
    /// The run stopped before provisioning; nothing was rolled back
    Aborted(String),
}

impl DeploymentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentOutcome::Succeeded)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DeploymentOutcome::Succeeded => None,
            DeploymentOutcome::Failed(reason) | DeploymentOutcome::Aborted(reason) => Some(reason),
        }
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentOutcome::Succeeded => write!(f, "Succeeded"),
            DeploymentOutcome::Failed(reason) => write!(f, "Failed: {reason}"),
            DeploymentOutcome::Aborted(reason) => write!(f, "Aborted: {reason}"),
        }
    }
}
