//! Deterministic collaborator implementations for tests and local rigs.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use url::Url;

use super::{
    BlobStorage, EmbeddingProvider, GenerationProvider, PageRenderer, RefreshNotifier,
    RenderedPage, VisionProvider,
};
use crate::types::ProviderError;

/// Deterministic embedding provider: the vector is a pure function of the
/// input text, so identical text always lands on identical vectors.
pub struct MockEmbeddingProvider {
    dims: usize,
    fixed: Option<Vec<f32>>,
    calls: Mutex<usize>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::with_dimensions(8)
    }

    pub fn with_dimensions(dims: usize) -> Self {
        Self {
            dims,
            fixed: None,
            calls: Mutex::new(0),
        }
    }

    /// Always return `vector`, regardless of input. Lets retrieval tests
    /// position the query exactly.
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            dims: vector.len(),
            fixed: Some(vector),
            calls: Mutex::new(0),
        }
    }

    /// Number of `embed` calls made so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        *self.calls.lock() += 1;
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        // FNV-style seed, then a small LCG per dimension. Stable across
        // platforms, no dependency on hasher internals.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.as_bytes() {
            seed ^= u64::from(*byte);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut state = seed.max(1);
        let mut vector = Vec::with_capacity(self.dims);
        for _ in 0..self.dims {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            vector.push(((state >> 33) as f32 / (u32::MAX as f32)) * 2.0 - 1.0);
        }
        Ok(vector)
    }
}

/// Generation provider that replays canned responses in order, then repeats
/// the last one.
pub struct MockGenerationProvider {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl MockGenerationProvider {
    pub fn with_responses(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GenerationProvider for MockGenerationProvider {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, ProviderError> {
        let mut queue = self.responses.lock();
        if let Some(next) = queue.pop_front() {
            *self.last.lock() = Some(next.clone());
            return Ok(next);
        }
        self.last
            .lock()
            .clone()
            .ok_or(ProviderError::Failed {
                provider: "generation",
                message: "no canned response configured".into(),
            })
    }
}

/// Vision provider that returns one fixed transcription.
pub struct MockVisionProvider {
    text: String,
}

impl MockVisionProvider {
    pub fn with_text(text: &str) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    async fn describe(
        &self,
        _bytes: &[u8],
        _mime_type: &str,
        _prompt: &str,
    ) -> Result<String, ProviderError> {
        Ok(self.text.clone())
    }
}

/// Renderer that returns fixed text or a fixed error.
pub struct MockRenderer {
    outcome: Result<String, ProviderError>,
}

impl MockRenderer {
    pub fn with_text(text: &str) -> Self {
        Self {
            outcome: Ok(text.into()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            outcome: Err(error),
        }
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn render(&self, _url: &Url) -> Result<RenderedPage, ProviderError> {
        match &self.outcome {
            Ok(text) => Ok(RenderedPage { text: text.clone() }),
            Err(ProviderError::Failed { provider, message }) => Err(ProviderError::Failed {
                provider,
                message: message.clone(),
            }),
            Err(ProviderError::Malformed { provider, message }) => Err(ProviderError::Malformed {
                provider,
                message: message.clone(),
            }),
        }
    }
}

/// In-memory blob storage keyed by opaque path.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, bytes: Vec<u8>) {
        self.blobs.write().insert(path.to_string(), bytes);
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        self.blobs
            .read()
            .get(path)
            .cloned()
            .ok_or(ProviderError::Failed {
                provider: "blob_storage",
                message: format!("no blob at '{path}'"),
            })
    }
}

/// Refresh notifier that records calls; optionally fails every time.
#[derive(Default)]
pub struct MockRefreshNotifier {
    pub fail: bool,
    notified: Mutex<Vec<(String, String)>>,
}

impl MockRefreshNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            notified: Mutex::new(Vec::new()),
        }
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notified.lock().clone()
    }
}

#[async_trait]
impl RefreshNotifier for MockRefreshNotifier {
    async fn notify(&self, tenant_id: &str, target_id: &str) -> Result<(), ProviderError> {
        if self.fail {
            return Err(ProviderError::Failed {
                provider: "refresh",
                message: "signal endpoint unavailable".into(),
            });
        }
        self.notified
            .lock()
            .push((tenant_id.to_string(), target_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        let c = provider.embed("goodbye world").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), provider.dimensions());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn canned_generation_replays_in_order() {
        let provider = MockGenerationProvider::with_responses(vec!["one", "two"]);
        assert_eq!(provider.complete("s", "p").await.unwrap(), "one");
        assert_eq!(provider.complete("s", "p").await.unwrap(), "two");
        assert_eq!(provider.complete("s", "p").await.unwrap(), "two");
    }
}
