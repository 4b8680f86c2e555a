//! External text-generation service used for segment naming and reports.
//!
//! The async stages only see [`TextGenerationService`]; the HTTP client,
//! prompt templates and response parsing live in the submodules.

pub mod openai;
pub mod parse;
pub mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::{CompsetError, Result};

pub use openai::OpenAiChatService;
pub use parse::parse_name_list;

/// Which async stage a request belongs to; selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPurpose {
    Naming,
    Report,
}

impl RequestPurpose {
    /// Wrap a message in this stage's service error.
    pub fn error(self, message: impl Into<String>) -> CompsetError {
        match self {
            Self::Naming => CompsetError::naming_service(message),
            Self::Report => CompsetError::report_service(message),
        }
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Language-specific system instruction
    pub system_instruction: String,
    /// Characterization text or serialized summary table
    pub prompt: String,
    /// Model identifier
    pub model: String,
    pub purpose: RequestPurpose,
}

/// A service that turns a prompt into text.
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Generate a completion; errors are the service error of `request.purpose`.
    async fn generate(&self, request: GenerationRequest) -> Result<String>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "text-generation"
    }
}

/// Service that always fails; used when no network access is wanted.
#[derive(Debug, Clone)]
pub struct DisabledService {
    reason: String,
}

impl DisabledService {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TextGenerationService for DisabledService {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        Err(request.purpose.error(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
