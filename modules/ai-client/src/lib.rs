pub mod anthropic;
pub mod util;

pub use anthropic::Anthropic;

use anyhow::Result;
use async_trait::async_trait;

/// A text-completion collaborator. Implementations take a system prompt and
/// a user prompt and return whatever free text the model produces — callers
/// are responsible for locating structured content inside the response.
#[async_trait]
pub trait CompletionAgent: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}
