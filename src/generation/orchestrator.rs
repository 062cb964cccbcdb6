//! Retry and failover across two generation providers

use super::gemini::GeminiProvider;
use super::openai::OpenAiChatProvider;
use super::prompt::{GenerationRequest, Prompt};
use super::provider::{GenerationProvider, ProviderError};
use super::retry::{ErrorClass, RetryAttempt, RetryPolicy, Sleeper, TokioSleeper};
use crate::config::{GenerationConfig, ProviderKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Returned when every configured provider failed
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I encountered an error processing your request. Please try again later.";

/// Returned when no provider could be initialized
pub const UNAVAILABLE_MESSAGE: &str = "AI service is not available. Please check configuration.";

/// Result of one generation call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub text: String,
    /// Provider that produced `text`, `None` for canned responses
    pub provider: Option<String>,
    /// Every failed call, in order
    pub attempts: Vec<RetryAttempt>,
    /// `text` is a canned message rather than a generated answer
    pub degraded: bool,
}

impl GenerationOutcome {
    fn canned(text: &str, attempts: Vec<RetryAttempt>) -> Self {
        Self {
            text: text.to_string(),
            provider: None,
            attempts,
            degraded: true,
        }
    }
}

/// Primary provider with retries, then the fallback with the same retries
///
/// `generate` never fails: exhausted providers yield [`APOLOGY_MESSAGE`].
pub struct GenerationOrchestrator {
    primary: Option<Arc<dyn GenerationProvider>>,
    fallback: Option<Arc<dyn GenerationProvider>>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    request_budget: Option<Duration>,
}

impl GenerationOrchestrator {
    /// The first candidate that initialized becomes primary, the next fallback
    ///
    /// Candidates are consumed lazily and only until two are ready.
    pub fn from_candidates<I>(candidates: I, policy: RetryPolicy) -> Self
    where
        I: IntoIterator<Item = Result<Arc<dyn GenerationProvider>, ProviderError>>,
    {
        let mut ready: Vec<Arc<dyn GenerationProvider>> = Vec::with_capacity(2);
        for candidate in candidates {
            match candidate {
                Ok(provider) => {
                    info!("Generation provider ready: {}", provider.name());
                    ready.push(provider);
                    if ready.len() == 2 {
                        break;
                    }
                }
                Err(e) => warn!("Generation provider unavailable: {}", e),
            }
        }

        let mut ready = ready.into_iter();
        Self {
            primary: ready.next(),
            fallback: ready.next(),
            policy,
            sleeper: Arc::new(TokioSleeper),
            request_budget: None,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        let candidates = config.providers.iter().map(|settings| match settings.kind {
            ProviderKind::Openai => OpenAiChatProvider::from_config(settings)
                .map(|p| Arc::new(p) as Arc<dyn GenerationProvider>),
            ProviderKind::Gemini => GeminiProvider::from_config(settings)
                .map(|p| Arc::new(p) as Arc<dyn GenerationProvider>),
        });

        Self::from_candidates(candidates, RetryPolicy::from_config(config))
            .with_request_budget(config.request_budget_secs.map(Duration::from_secs_f64))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Wall-clock limit applied by [`generate`](Self::generate)
    pub fn with_request_budget(mut self, budget: Option<Duration>) -> Self {
        self.request_budget = budget;
        self
    }

    pub fn is_available(&self) -> bool {
        self.primary.is_some()
    }

    /// Primary first
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers().map(|p| p.name()).collect()
    }

    fn providers(&self) -> impl Iterator<Item = &Arc<dyn GenerationProvider>> + '_ {
        self.primary.iter().chain(self.fallback.iter())
    }

    pub async fn generate(&self, query: &str, context: &str, persona: &str) -> String {
        let deadline = self.request_budget.map(|budget| Instant::now() + budget);
        let request = GenerationRequest::new(query, context, persona);
        self.generate_detailed(&request, deadline).await.text
    }

    pub async fn generate_detailed(
        &self,
        request: &GenerationRequest,
        deadline: Option<Instant>,
    ) -> GenerationOutcome {
        if !self.is_available() {
            warn!("No generation provider configured");
            return GenerationOutcome::canned(UNAVAILABLE_MESSAGE, Vec::new());
        }

        let prompt = Prompt::build(request);
        let mut attempts = Vec::new();

        for provider in self.providers() {
            if let Some(text) = self
                .run_provider(provider.as_ref(), &prompt, deadline, &mut attempts)
                .await
            {
                return GenerationOutcome {
                    text,
                    provider: Some(provider.name().to_string()),
                    attempts,
                    degraded: false,
                };
            }
            warn!("Provider {} failed, trying the next one", provider.name());
        }

        error!(
            "All generation providers failed after {} attempts",
            attempts.len()
        );
        GenerationOutcome::canned(APOLOGY_MESSAGE, attempts)
    }

    /// Attempt one provider until success, a non-retryable error, exhausted
    /// attempts, or the deadline
    async fn run_provider(
        &self,
        provider: &dyn GenerationProvider,
        prompt: &Prompt,
        deadline: Option<Instant>,
        attempts: &mut Vec<RetryAttempt>,
    ) -> Option<String> {
        let name = provider.name();

        for attempt in 1..=self.policy.max_attempts {
            let started = Instant::now();
            if deadline.is_some_and(|d| started >= d) {
                warn!("Deadline passed before attempt {} on {}", attempt, name);
                return None;
            }

            let result = match deadline {
                Some(d) => tokio::time::timeout_at(d, provider.complete(prompt))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ProviderError::Timeout(d.saturating_duration_since(started)))
                    }),
                None => provider.complete(prompt).await,
            };

            let error = match result {
                Ok(text) if !text.trim().is_empty() => return Some(text),
                Ok(_) => ProviderError::EmptyResponse(name.to_string()),
                Err(e) => e,
            };
            let class = error.class();

            let mut delay = None;
            if class == ErrorClass::Retryable && attempt < self.policy.max_attempts {
                let next = self.policy.delay_for(attempt - 1);
                if deadline.is_some_and(|d| Instant::now() + next >= d) {
                    warn!("Backoff of {:?} on {} would overrun the deadline", next, name);
                } else {
                    delay = Some(next);
                }
            }

            attempts.push(RetryAttempt {
                provider: name.to_string(),
                attempt,
                error: error.to_string(),
                class,
                delay,
            });

            match delay {
                Some(delay) => {
                    warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        name, attempt, self.policy.max_attempts, error, delay
                    );
                    self.sleeper.sleep(delay).await;
                }
                None => {
                    warn!(
                        "{} attempt {}/{} failed ({:?}): {}",
                        name, attempt, self.policy.max_attempts, class, error
                    );
                    return None;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str, message: &str) -> Arc<Self> {
            Self::new(
                name,
                (0..10)
                    .map(|_| Err(ProviderError::Request(message.to_string())))
                    .collect(),
            )
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Request("script exhausted".to_string())))
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl GenerationProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    impl RecordingSleeper {
        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    fn orchestrator(
        providers: Vec<Arc<dyn GenerationProvider>>,
        sleeper: Arc<RecordingSleeper>,
    ) -> GenerationOrchestrator {
        GenerationOrchestrator::from_candidates(
            providers.into_iter().map(Ok),
            RetryPolicy::default(),
        )
        .with_sleeper(sleeper)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("What is Rust?", "Rust is a language.", "You are helpful.")
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let provider = ScriptedProvider::new(
            "primary",
            vec![
                Err(ProviderError::Request("503 model overloaded".to_string())),
                Err(ProviderError::Request("429 rate limited".to_string())),
                Ok("Rust is a systems language.".to_string()),
                Ok("never requested".to_string()),
            ],
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = orchestrator(vec![provider.clone()], sleeper.clone());

        let outcome = orchestrator.generate_detailed(&request(), None).await;

        assert_eq!(outcome.text, "Rust is a systems language.");
        assert!(!outcome.degraded);
        assert_eq!(provider.calls(), 3);
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] < sleeps[1]);
        assert!(sleeps[0] >= Duration::from_secs(1) && sleeps[0] < Duration::from_secs(2));
        assert!(sleeps[1] >= Duration::from_secs(2) && sleeps[1] < Duration::from_secs(3));
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_after_primary_exhausted() {
        let primary = ScriptedProvider::failing("primary", "503 unavailable");
        let fallback = ScriptedProvider::new("fallback", vec![Ok("from fallback".to_string())]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = orchestrator(vec![primary.clone(), fallback.clone()], sleeper.clone());

        let text = orchestrator
            .generate("What is Rust?", "Rust is a language.", "You are helpful.")
            .await;

        assert_eq!(text, "from fallback");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_both_fail_returns_apology() {
        let primary = ScriptedProvider::failing("primary", "503 unavailable");
        let fallback = ScriptedProvider::failing("fallback", "server busy");
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = orchestrator(vec![primary.clone(), fallback.clone()], sleeper);

        let outcome = orchestrator.generate_detailed(&request(), None).await;

        assert_eq!(outcome.text, APOLOGY_MESSAGE);
        assert!(outcome.degraded);
        assert_eq!(outcome.provider, None);
        assert_eq!(outcome.attempts.len(), 6);
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_skips_remaining_attempts() {
        let primary = ScriptedProvider::failing("primary", "401 Unauthorized: invalid_api_key");
        let fallback = ScriptedProvider::new("fallback", vec![Ok("ok".to_string())]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = orchestrator(vec![primary.clone(), fallback], sleeper.clone());

        let outcome = orchestrator.generate_detailed(&request(), None).await;

        assert_eq!(outcome.text, "ok");
        assert_eq!(outcome.provider.as_deref(), Some("fallback"));
        assert_eq!(primary.calls(), 1);
        assert!(sleeper.sleeps().is_empty());
        assert_eq!(outcome.attempts[0].class, ErrorClass::NonRetryable);
        assert_eq!(outcome.attempts[0].delay, None);
    }

    #[tokio::test]
    async fn test_blank_response_is_retried() {
        let provider = ScriptedProvider::new(
            "primary",
            vec![Ok("   ".to_string()), Ok("real answer".to_string())],
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = orchestrator(vec![provider.clone()], sleeper.clone());

        let outcome = orchestrator.generate_detailed(&request(), None).await;
        assert_eq!(outcome.text, "real answer");
        assert_eq!(provider.calls(), 2);
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_no_providers_is_unavailable() {
        let orchestrator = GenerationOrchestrator::from_candidates(
            vec![Err(ProviderError::Initialization("no key".to_string()))],
            RetryPolicy::default(),
        );
        assert!(!orchestrator.is_available());
        assert_eq!(orchestrator.generate("q", "", "p").await, UNAVAILABLE_MESSAGE);
    }

    #[test]
    fn test_first_two_initialized_candidates_used() {
        let candidates: Vec<Result<Arc<dyn GenerationProvider>, ProviderError>> = vec![
            Err(ProviderError::Initialization("missing key".to_string())),
            Ok(ScriptedProvider::new("b", Vec::new())),
            Ok(ScriptedProvider::new("c", Vec::new())),
            Ok(ScriptedProvider::new("d", Vec::new())),
        ];
        let orchestrator =
            GenerationOrchestrator::from_candidates(candidates, RetryPolicy::default());
        assert_eq!(orchestrator.provider_names(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_deadline_stops_backoff() {
        let provider = ScriptedProvider::failing("primary", "503 unavailable");
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = GenerationOrchestrator::from_candidates(
            vec![Ok(provider.clone() as Arc<dyn GenerationProvider>)],
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                jitter: Duration::ZERO,
            },
        )
        .with_sleeper(sleeper.clone());

        let deadline = Instant::now() + Duration::from_millis(1500);
        let outcome = orchestrator.generate_detailed(&request(), Some(deadline)).await;

        assert_eq!(outcome.text, APOLOGY_MESSAGE);
        // The 1s backoff fits in the budget, the 2s one does not.
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(1)]);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_deadline_bounds_provider_call() {
        let fallback = ScriptedProvider::new("fallback", vec![Ok("unreachable".to_string())]);
        let orchestrator = GenerationOrchestrator::from_candidates(
            vec![
                Ok(Arc::new(StalledProvider) as Arc<dyn GenerationProvider>),
                Ok(fallback.clone() as Arc<dyn GenerationProvider>),
            ],
            RetryPolicy::default(),
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()));

        let deadline = Instant::now() + Duration::from_millis(50);
        let outcome = orchestrator.generate_detailed(&request(), Some(deadline)).await;

        assert_eq!(outcome.text, APOLOGY_MESSAGE);
        assert_eq!(fallback.calls(), 0);
        assert!(outcome.attempts[0].error.contains("timed out"));
    }
}
