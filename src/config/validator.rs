use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::MAX_BATCH_SIZE;
use crate::error::{LecternError, Result, ValidationError};

const KNOWN_EMBEDDING_PROVIDERS: &[&str] = &["openai", "local", "hashing"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_generation(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LecternError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        let name = &config.storage.index_name;
        if name.is_empty() || name.contains(['/', '\\']) {
            errors.push(ValidationError::new(
                "storage.index_name",
                format!("Index name must be a plain file stem: '{}'", name),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.providers.is_empty() {
            errors.push(ValidationError::new(
                "embedding.providers",
                "At least one embedding provider is required",
            ));
        }
        for name in &embedding.providers {
            if !KNOWN_EMBEDDING_PROVIDERS.contains(&name.as_str()) {
                errors.push(ValidationError::new(
                    "embedding.providers",
                    format!(
                        "Unknown provider '{}', expected one of: {}",
                        name,
                        KNOWN_EMBEDDING_PROVIDERS.join(", ")
                    ),
                ));
            }
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if embedding.batch_size == 0 || embedding.batch_size > MAX_BATCH_SIZE {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                format!("Batch size must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        if embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if embedding.providers.iter().any(|p| p == "openai") && embedding.api_key_env.is_empty() {
            errors.push(ValidationError::new(
                "embedding.api_key_env",
                "API key environment variable name cannot be empty",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.max_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_k",
                "max_k must be greater than 0",
            ));
        }
        if retrieval.default_k == 0 || retrieval.default_k > retrieval.max_k {
            errors.push(ValidationError::new(
                "retrieval.default_k",
                format!("default_k must be between 1 and max_k ({})", retrieval.max_k),
            ));
        }

        for (path, score) in [
            ("retrieval.vector_min_score", retrieval.vector_min_score),
            ("retrieval.lexical_min_score", retrieval.lexical_min_score),
        ] {
            if !(-1.0..=1.0).contains(&score) {
                errors.push(ValidationError::new(
                    path,
                    format!("Score threshold must be within [-1, 1], got {}", score),
                ));
            }
        }

        if retrieval.keyword_chunks_per_document == 0 {
            errors.push(ValidationError::new(
                "retrieval.keyword_chunks_per_document",
                "Must emit at least one chunk per document",
            ));
        }
        if retrieval.keyword_max_chunks == 0 {
            errors.push(ValidationError::new(
                "retrieval.keyword_max_chunks",
                "Keyword chunk cap must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;

        if generation.max_attempts == 0 {
            errors.push(ValidationError::new(
                "generation.max_attempts",
                "At least one attempt is required",
            ));
        }
        if !(generation.base_delay_secs >= 0.0 && generation.base_delay_secs.is_finite()) {
            errors.push(ValidationError::new(
                "generation.base_delay_secs",
                "Base delay must be a non-negative number",
            ));
        }
        if !(generation.jitter_secs >= 0.0 && generation.jitter_secs.is_finite()) {
            errors.push(ValidationError::new(
                "generation.jitter_secs",
                "Jitter must be a non-negative number",
            ));
        }
        if let Some(budget) = generation.request_budget_secs {
            if !(budget > 0.0 && budget.is_finite()) {
                errors.push(ValidationError::new(
                    "generation.request_budget_secs",
                    "Request budget must be a positive number",
                ));
            }
        }

        for (i, provider) in generation.providers.iter().enumerate() {
            if provider.model.is_empty() {
                errors.push(ValidationError::new(
                    format!("generation.providers[{}].model", i),
                    "Model cannot be empty",
                ));
            }
            if provider.max_tokens == 0 {
                errors.push(ValidationError::new(
                    format!("generation.providers[{}].max_tokens", i),
                    "max_tokens must be greater than 0",
                ));
            }
            if !(0.0..=2.0).contains(&provider.temperature) {
                errors.push(ValidationError::new(
                    format!("generation.providers[{}].temperature", i),
                    format!("Temperature must be within [0, 2], got {}", provider.temperature),
                ));
            }
        }
    }
}
