//! Self-correction policy
//!
//! Inspects a tool failure and decides whether another attempt is
//! warranted, and of what kind: a mechanical re-dispatch for transient
//! failures, or corrective guidance for the reasoner when the generated
//! code itself is wrong. Attempt counts are tracked per tool by the
//! orchestrator, so one tool's retries never consume another's budget.

use crate::models::{ToolError, ToolErrorKind};
use std::time::Duration;

/// What to do about a tool failure.
#[derive(Debug, Clone)]
pub enum CorrectionDecision {
    Retry {
        /// Re-dispatch the same request unchanged (transient failure)
        /// rather than sending it back through the reasoner.
        redispatch: bool,
        /// Wait this long before the next attempt.
        delay: Option<Duration>,
        /// Corrective context to append to the conversation so the
        /// reasoner regenerates the failing code.
        guidance: Option<String>,
    },
    GiveUp {
        explanation: String,
    },
}

#[derive(Debug, Clone)]
pub struct CorrectionPolicy {
    /// Code regeneration attempts after an execution error.
    pub max_execution_retries: u32,
    /// Repeated timeouts are a resource problem, not a correctness one.
    pub max_timeout_retries: u32,
    /// Retrieval retries, spaced by exponential backoff.
    pub max_retrieval_retries: u32,
    pub backoff_base: Duration,
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        Self {
            max_execution_retries: 3,
            max_timeout_retries: 1,
            max_retrieval_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl CorrectionPolicy {
    /// Decide what to do about `failure`, given how many times this tool
    /// has already failed in the current lineage (1 = first failure).
    pub fn correct(&self, failure: &ToolError, attempt_count: u32) -> CorrectionDecision {
        match failure.kind {
            ToolErrorKind::ExecutionFailed => {
                if attempt_count <= self.max_execution_retries {
                    CorrectionDecision::Retry {
                        redispatch: false,
                        delay: None,
                        guidance: Some(format!(
                            "The previous code failed with this error:\n{}\n\n\
                             Rewrite the code to fix the error and run it again.",
                            failure.detail
                        )),
                    }
                } else {
                    CorrectionDecision::GiveUp {
                        explanation: format!(
                            "code execution kept failing after {} attempts (last error: {})",
                            attempt_count, failure.detail
                        ),
                    }
                }
            }

            ToolErrorKind::Timeout => {
                if attempt_count <= self.max_timeout_retries {
                    CorrectionDecision::Retry {
                        redispatch: true,
                        delay: None,
                        guidance: None,
                    }
                } else {
                    CorrectionDecision::GiveUp {
                        explanation: "repeated execution timeouts; the computation does not fit \
                                      the configured time limit"
                            .to_string(),
                    }
                }
            }

            ToolErrorKind::Unavailable => {
                if attempt_count <= self.max_retrieval_retries {
                    CorrectionDecision::Retry {
                        redispatch: true,
                        delay: Some(self.backoff(attempt_count)),
                        guidance: None,
                    }
                } else {
                    CorrectionDecision::GiveUp {
                        explanation: format!(
                            "the data source stayed unavailable after {} attempts ({})",
                            attempt_count, failure.detail
                        ),
                    }
                }
            }

            // Contract violations by the reasoning step, not transient
            // conditions. Retrying the same request cannot help.
            ToolErrorKind::UnknownTool | ToolErrorKind::MalformedToolRequest => {
                CorrectionDecision::GiveUp {
                    explanation: format!(
                        "the reasoning step produced an invalid tool request ({})",
                        failure
                    ),
                }
            }
        }
    }

    /// Exponential backoff: base * 2^(n-1), capped to keep delays sane.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(6);
        self.backoff_base * 2u32.pow(exponent)
    }
}
