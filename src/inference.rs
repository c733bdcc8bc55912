use crate::error::{FinancialIngestError, Result};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// A text-in, text-out language model. The pipeline never depends on a concrete client,
/// so tests can substitute a deterministic fake.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Implementations should give up after `timeout` and report
    /// [`FinancialIngestError::CollaboratorUnavailable`] on transport failures.
    async fn infer(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

#[async_trait]
impl<T: InferenceService + ?Sized> InferenceService for Arc<T> {
    async fn infer(&self, prompt: &str, timeout: Duration) -> Result<String> {
        (**self).infer(prompt, timeout).await
    }
}

#[async_trait]
impl<T: InferenceService + ?Sized> InferenceService for &T {
    async fn infer(&self, prompt: &str, timeout: Duration) -> Result<String> {
        (**self).infer(prompt, timeout).await
    }
}

/// Issues exactly one call and enforces `timeout` even if the service ignores it.
pub async fn infer_within<S: InferenceService + ?Sized>(
    service: &S,
    prompt: &str,
    timeout: Duration,
) -> Result<String> {
    debug!(
        "Sending {} character prompt to inference service (timeout {:?})",
        prompt.chars().count(),
        timeout
    );
    match tokio::time::timeout(timeout, service.infer(prompt, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(FinancialIngestError::CollaboratorUnavailable(format!(
            "no response within {}s",
            timeout.as_secs_f64()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleepy;

    #[async_trait]
    impl InferenceService for Sleepy {
        async fn infer(&self, _prompt: &str, _timeout: Duration) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("too late".to_string())
        }
    }

    struct Echo;

    #[async_trait]
    impl InferenceService for Echo {
        async fn infer(&self, prompt: &str, _timeout: Duration) -> Result<String> {
            Ok(prompt.to_uppercase())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_enforced() {
        let err = infer_within(&Sleepy, "hello", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_response_passes_through() {
        let service: Arc<dyn InferenceService> = Arc::new(Echo);
        let reply = infer_within(&service, "hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, "HELLO");
    }
}
