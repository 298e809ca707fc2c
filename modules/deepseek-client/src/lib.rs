//! Client for the DeepSeek chat completions API (OpenAI-compatible wire
//! format). The pipeline's budget guard wraps this; the client itself only
//! knows how to make one metered call and report token usage.

mod client;
mod error;
mod types;

pub use client::DeepSeekClient;
pub use error::DeepSeekError;
pub use types::{GenerationRequest, GenerationResponse};

use async_trait::async_trait;

/// A metered text-generation capability. Implemented by [`DeepSeekClient`]
/// in production and by fakes in tests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, DeepSeekError>;
}
