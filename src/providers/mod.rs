//! Seams to the external collaborators this core calls but does not own.
//!
//! Embedding, generation, image/document understanding, headless rendering,
//! blob storage, and the optional refresh signal are all trait objects:
//! production wires real clients, tests wire the deterministic [`mocks`].
//! Collaborator failures surface as [`ProviderError`] and are treated as
//! retryable by the external trigger policy unless the payload itself is
//! malformed.

pub mod mocks;

use async_trait::async_trait;
use url::Url;

use crate::types::ProviderError;

/// Produces fixed-dimension vectors for text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Batched convenience; the default embeds sequentially, which is what
    /// rate-limited upstreams want anyway.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Produces a free-text or JSON completion for a prompt pair.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// Understands images and scanned documents, returning transcribed text.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe(
        &self,
        bytes: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, ProviderError>;
}

/// Output of the headless rendering collaborator.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    /// Rendered visible text; empty when the renderer found nothing.
    pub text: String,
}

/// Renders a URL in a real browser environment. Last-resort tier only.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<RenderedPage, ProviderError>;
}

/// Read-only byte storage for uploaded PDFs and images, addressed by an
/// opaque path.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Best-effort signal that a tenant's serving layer should refresh. Failure
/// never affects the primary result.
#[async_trait]
pub trait RefreshNotifier: Send + Sync {
    async fn notify(&self, tenant_id: &str, target_id: &str) -> Result<(), ProviderError>;
}
