//! Prompt assembly

use serde::{Deserialize, Serialize};

/// Appended to every persona
pub const GROUNDING_INSTRUCTION: &str = "Use the provided context to answer questions accurately. \
If the context doesn't contain relevant information, provide a helpful general response.";

/// Inputs of one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub query: String,
    /// Retrieved chunk text, possibly empty
    pub context: String,
    /// Role description that opens the system prompt
    pub persona: String,
}

impl GenerationRequest {
    pub fn new(
        query: impl Into<String>,
        context: impl Into<String>,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            context: context.into(),
            persona: persona.into(),
        }
    }
}

/// System and user messages sent to a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn build(request: &GenerationRequest) -> Self {
        let system = format!("{}\n\n{}", request.persona.trim(), GROUNDING_INSTRUCTION);
        let user = if request.context.trim().is_empty() {
            request.query.clone()
        } else {
            format!("Context:\n{}\n\nQuestion: {}", request.context, request.query)
        };
        Self { system, user }
    }
}
