use std::time::Duration;

use thiserror::Error;

/// Failures talking to the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The call did not complete within its budget.
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure or a server-side fault with no usable answer.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The CRM answered and refused the operation.
    #[error("upstream rejected the request: {}", .messages.join("; "))]
    Rejected { messages: Vec<String> },

    /// The CRM answered with something we could not interpret.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// The client is missing settings it needs to make calls.
    #[error("upstream not configured: {0}")]
    NotConfigured(String),
}

impl UpstreamError {
    pub fn rejected(message: impl Into<String>) -> Self {
        UpstreamError::Rejected {
            messages: vec![message.into()],
        }
    }

    /// Whether the failure is transport-level rather than an answer.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_) | UpstreamError::Unavailable(_)
        )
    }
}
