use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::intake::Submission;
use crate::simplifier::{Simplifier, SimplifierError};

/// Outcome of initialising the completion capability. Produced once at startup and never
/// changed afterwards.
#[derive(Clone)]
pub enum Capability {
    Ready(Arc<dyn Simplifier>),
    Unavailable { reason: String },
}

impl Capability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Capability::Ready(_))
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Ready(_) => f.write_str("Capability::Ready"),
            Capability::Unavailable { reason } => f
                .debug_struct("Capability::Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub enum OrchestratorError {
    CapabilityUnavailable,
    SimplificationFailed(SimplifierError),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::CapabilityUnavailable => write!(f, "AI Simplifier not available"),
            OrchestratorError::SimplificationFailed(err) => {
                write!(f, "simplification failed: {}", err)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// Runs one simplification. An unready capability fails fast without an outbound call; a
/// ready one is called exactly once and its output is returned as is.
pub async fn simplify(
    capability: &Capability,
    submission: &Submission,
) -> Result<String, OrchestratorError> {
    let simplifier = match capability {
        Capability::Ready(simplifier) => simplifier,
        Capability::Unavailable { .. } => return Err(OrchestratorError::CapabilityUnavailable),
    };

    let span = tracing::info_span!(
        "simplifier.complete",
        input_chars = submission.text.chars().count(),
        filename = submission.filename.as_deref().unwrap_or(""),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    async {
        let started = Instant::now();
        let result = simplifier.complete(&submission.text).await;

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency_ms);

        match result {
            Ok(simplified) => {
                tracing::Span::current().record("outcome", "ok");
                Ok(simplified)
            }
            Err(err) => {
                tracing::Span::current().record("outcome", "error");
                tracing::error!(error = %err, "completion capability failed");
                Err(OrchestratorError::SimplificationFailed(err))
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::intake::SubmissionSource;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Simplifier for Counting {
        async fn complete(&self, text: &str) -> Result<String, SimplifierError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(SimplifierError::InvalidResponse)
            } else {
                Ok(format!("  plain: {}  ", text))
            }
        }
    }

    fn submission(text: &str) -> Submission {
        Submission {
            text: text.to_string(),
            filename: None,
            source: SubmissionSource::Json,
        }
    }

    #[tokio::test]
    async fn unavailable_capability_is_never_called() {
        let capability = Capability::Unavailable {
            reason: "SIMPLIFIER_API_KEY is not set".to_string(),
        };

        let err = simplify(&capability, &submission("clause")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CapabilityUnavailable));
        assert!(!capability.is_ready());
    }

    #[tokio::test]
    async fn ready_capability_output_is_returned_unmodified() {
        let calls = Arc::new(AtomicUsize::new(0));
        let capability = Capability::Ready(Arc::new(Counting {
            calls: calls.clone(),
            fail: false,
        }));

        let out = simplify(&capability, &submission("clause"))
            .await
            .expect("simplification should succeed");

        assert_eq!(out, "  plain: clause  ");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn capability_failure_is_reported_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let capability = Capability::Ready(Arc::new(Counting {
            calls: calls.clone(),
            fail: true,
        }));

        let err = simplify(&capability, &submission("clause")).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::SimplificationFailed(SimplifierError::InvalidResponse)
        ));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
