use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use nodeflow_core::config::{ModelConfig, RetryConfig};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::LlmClient;
use nodeflow_core::types::*;

/// Retries the primary client on transient failures, then walks the
/// fallback models in order.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &NodeflowError) -> bool {
    match e {
        NodeflowError::LlmRequest(msg) => {
            let msg = msg.to_ascii_lowercase();
            ["429", "500", "502", "503", "504", "timeout", "timed out", "connection"]
                .iter()
                .any(|needle| msg.contains(needle))
        }
        NodeflowError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// One model with its client and how many extra attempts it gets.
struct Candidate<'m, 'c> {
    model: &'m ModelConfig,
    client: &'c dyn LlmClient,
    retries: u32,
}

/// Calls `candidate` until it answers, fails permanently, or runs out of
/// retries. Transient failures back off exponentially between attempts.
async fn call_with_retries<'c>(
    candidate: &Candidate<'_, 'c>,
    messages: &[ChatMessage],
    policy: &RetryConfig,
) -> Result<BoxStream<'c, Result<StreamDelta>>> {
    let mut attempt = 0;
    loop {
        let err = match candidate
            .client
            .chat_stream(candidate.model, messages.to_vec())
            .await
        {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };
        if attempt >= candidate.retries || !is_retryable(&err) {
            return Err(err);
        }
        let backoff = calculate_backoff(attempt, policy);
        attempt += 1;
        warn!(
            model = %candidate.model.model_id,
            attempt,
            max_retries = candidate.retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Retrying LLM request"
        );
        tokio::time::sleep(backoff).await;
    }
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            // Fallback models get a single attempt each.
            let primary = Candidate {
                model: &config,
                client: self.primary.as_ref(),
                retries: self.retry_config.max_retries,
            };
            let fallbacks = self.fallbacks.iter().map(|(model, client)| Candidate {
                model,
                client: client.as_ref(),
                retries: 0,
            });

            let mut last_err = None;
            for (index, candidate) in std::iter::once(primary).chain(fallbacks).enumerate() {
                if index == 1 {
                    info!("Primary LLM exhausted, trying fallback models");
                }
                match call_with_retries(&candidate, &messages, &self.retry_config).await {
                    Ok(stream) => {
                        if index > 0 {
                            info!(
                                model = %candidate.model.model_id,
                                provider = %candidate.model.provider,
                                "Fell back to alternative model"
                            );
                        }
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %candidate.model.model_id, error = %e, "LLM request failed");
                        last_err = Some(e);
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| NodeflowError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails with the given error until `fail_times` calls have been made.
    struct Flaky {
        calls: Arc<AtomicU32>,
        fail_times: u32,
        error: fn() -> NodeflowError,
    }

    impl LlmClient for Flaky {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.fail_times {
                    Err((self.error)())
                } else {
                    let items = vec![Ok(StreamDelta::TextDelta("ok".into()))];
                    Ok(Box::pin(futures::stream::iter(items)) as BoxStream<'_, _>)
                }
            })
        }
    }

    fn flaky(fail_times: u32, error: fn() -> NodeflowError) -> (Box<dyn LlmClient>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let client = Flaky {
            calls: calls.clone(),
            fail_times,
            error,
        };
        (Box::new(client), calls)
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&NodeflowError::LlmRequest("HTTP 429 Too Many Requests: slow down".into())));
        assert!(is_retryable(&NodeflowError::LlmRequest("connection reset".into())));
        assert!(is_retryable(&NodeflowError::LlmStream("eof".into())));
        assert!(!is_retryable(&NodeflowError::LlmRequest("HTTP 401 Unauthorized: bad key".into())));
        assert!(!is_retryable(&NodeflowError::LlmParse("bad json".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let backoff = calculate_backoff(8, &config);
        assert!(backoff <= Duration::from_millis(6000));
        assert!(backoff >= Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let (primary, calls) = flaky(2, || NodeflowError::LlmRequest("HTTP 503: busy".into()));
        let client = RetryingClient::new(primary, vec![], RetryConfig::default());
        let result = client.chat_stream(&ModelConfig::default(), vec![]).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_goes_to_fallback() {
        let (primary, primary_calls) =
            flaky(u32::MAX, || NodeflowError::LlmRequest("HTTP 401: denied".into()));
        let (fallback, fallback_calls) = flaky(0, || NodeflowError::Cancelled);
        let client = RetryingClient::new(
            primary,
            vec![(ModelConfig::default(), fallback)],
            RetryConfig::default(),
        );
        assert!(client.chat_stream(&ModelConfig::default(), vec![]).await.is_ok());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let (primary, _) = flaky(u32::MAX, || NodeflowError::LlmRequest("HTTP 500: down".into()));
        let client = RetryingClient::new(
            primary,
            vec![],
            RetryConfig {
                max_retries: 1,
                ..RetryConfig::default()
            },
        );
        match client.chat_stream(&ModelConfig::default(), vec![]).await {
            Err(NodeflowError::LlmRequest(msg)) => assert!(msg.contains("500")),
            Err(other) => panic!("Expected LlmRequest, got {:?}", other),
            Ok(_) => panic!("Expected error"),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_primary_retries() {
        let (primary, primary_calls) =
            flaky(u32::MAX, || NodeflowError::LlmRequest("HTTP 503: busy".into()));
        let (fallback, fallback_calls) = flaky(0, || NodeflowError::Cancelled);
        let client = RetryingClient::new(
            primary,
            vec![(ModelConfig::default(), fallback)],
            RetryConfig {
                max_retries: 2,
                ..RetryConfig::default()
            },
        );
        assert!(client.chat_stream(&ModelConfig::default(), vec![]).await.is_ok());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallbacks_are_not_retried() {
        let (primary, _) = flaky(u32::MAX, || NodeflowError::LlmRequest("HTTP 401: denied".into()));
        let (first, first_calls) = flaky(u32::MAX, || NodeflowError::LlmStream("reset".into()));
        let (second, second_calls) =
            flaky(u32::MAX, || NodeflowError::LlmRequest("HTTP 502: gateway".into()));
        let client = RetryingClient::new(
            primary,
            vec![(ModelConfig::default(), first), (ModelConfig::default(), second)],
            RetryConfig::default(),
        );
        match client.chat_stream(&ModelConfig::default(), vec![]).await {
            Err(NodeflowError::LlmRequest(msg)) => assert!(msg.contains("502")),
            Err(other) => panic!("Expected LlmRequest, got {:?}", other),
            Ok(_) => panic!("Expected error"),
        };
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }
}
