//! Answer generation with retry, backoff and provider failover

mod gemini;
mod openai;
mod orchestrator;
mod prompt;
mod provider;
mod retry;

pub use gemini::GeminiProvider;
pub use openai::OpenAiChatProvider;
pub use orchestrator::{
    GenerationOrchestrator, GenerationOutcome, APOLOGY_MESSAGE, UNAVAILABLE_MESSAGE,
};
pub use prompt::{GenerationRequest, Prompt, GROUNDING_INSTRUCTION};
pub use provider::{GenerationProvider, ProviderError};
pub use retry::{classify, ErrorClass, RetryAttempt, RetryPolicy, Sleeper, TokioSleeper};
