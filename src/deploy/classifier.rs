// ============================================================================
// File: src/deploy/classifier.rs
// ----------------------------------------------------------------------------
// Decides whether a provisioning step's output counts as a failure.
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::remote::CommandResult;

use super::steps::ProvisioningStep;

/// Keywords that mark a step as failed ("fel" is Swedish for error)
pub const DEFAULT_FAILURE_KEYWORDS: [&str; 3] = ["fel", "error", "failed"];

/// Classification of one step's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Pluggable failure detection for provisioning steps
///
/// Closures `Fn(&ProvisioningStep, &CommandResult) -> Verdict` implement
/// this trait too.
pub trait OutputClassifier: Send + Sync {
    fn classify(&self, step: &ProvisioningStep, result: &CommandResult) -> Verdict;
}

impl<F> OutputClassifier for F
where
    F: Fn(&ProvisioningStep, &CommandResult) -> Verdict + Send + Sync,
{
    fn classify(&self, step: &ProvisioningStep, result: &CommandResult) -> Verdict {
        self(step, result)
    }
}

/// Case-insensitive substring match on stdout
///
/// stderr is ignored: apt and friends write progress there.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::with_keywords(DEFAULT_FAILURE_KEYWORDS)
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl OutputClassifier for KeywordClassifier {
    fn classify(&self, _step: &ProvisioningStep, result: &CommandResult) -> Verdict {
        let stdout = result.stdout.to_lowercase();
        match self.keywords.iter().find(|k| stdout.contains(k.as_str())) {
            Some(keyword) => Verdict::Fail(format!("output contains '{keyword}'")),
            None => Verdict::Pass,
        }
    }
}

/// Fails a step on any non-zero exit status
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitStatusClassifier;

impl OutputClassifier for ExitStatusClassifier {
    fn classify(&self, _step: &ProvisioningStep, result: &CommandResult) -> Verdict {
        match result.exit_status {
            Some(status) if status != 0 => Verdict::Fail(format!("exit status {status}")),
            _ => Verdict::Pass,
        }
    }
}
