// ============================================================================
// File: src/deploy/mod.rs
// ----------------------------------------------------------------------------
// Deployment orchestration:
// - State machine and outcomes
// - Provisioning steps and output classification
// - Per-VM run lock
// ============================================================================

mod classifier;
mod orchestrator;
mod run_lock;
mod state;
mod steps;


pub use classifier::{
    DEFAULT_FAILURE_KEYWORDS, ExitStatusClassifier, KeywordClassifier, OutputClassifier, Verdict,
};
pub use orchestrator::{DeployReport, Orchestrator, RollbackOutcome};
pub use run_lock::{RunGuard, RunLock};
pub use state::{DeployState, DeploymentOutcome, StateTracker};
pub use steps::{ProvisioningStep, StepRecord, default_provisioning_steps};
