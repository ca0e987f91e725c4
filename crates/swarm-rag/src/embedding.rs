//! Embedding Provider (§4.1): maps a batch of texts to a batch of
//! unit-normalized vectors of a fixed dimension `d`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use swarm_core::Error;

/// Minimum batch size the provider must accept in one `embed` call.
pub const MIN_BATCH: usize = 32;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Backend label, for `stats()` and logging.
    fn backend(&self) -> &str;

    /// Fixed dimension of vectors this backend produces. `None` before the
    /// first successful `embed` call if the backend doesn't advertise it
    /// up front.
    fn dimension(&self) -> Option<usize>;

    /// Map `texts` (1..B non-empty strings) to unit-normalized vectors in
    /// the same order. Fails with `embedding_backend_unavailable` if the
    /// backend is unreachable; `embedding_dimension_mismatch` if the
    /// backend returns vectors of inconsistent length within one batch.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error>;
}

/// L2-normalize in place so cosine similarity reduces to a dot product.
/// A zero vector is left as-is (a zero-length embedding has no direction).
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponseItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseItem>,
}

/// An HTTP embedding backend speaking the common `{input, model} ->
/// {data: [{embedding}]}` batch wire shape shared by OpenAI-compatible
/// embedding endpoints — whether that's a local inference server
/// (preferred, zero-cost) or a remote API. Which one this instance talks
/// to is just a matter of `base_url`/`api_key`; the wire shape and error
/// handling are identical, so one implementation covers both per §4.1's
/// "backend-agnostic" design decision.
pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    label: String,
    dimension: std::sync::OnceLock<usize>,
}

impl HttpEmbeddingProvider {
    pub fn new(label: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            label: label.into(),
            dimension: std::sync::OnceLock::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn backend(&self) -> &str {
        &self.label
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        if texts.is_empty() {
            return Err(Error::bad_request("embed requires at least one text"));
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbedRequest {
                input: texts,
                model: &self.model,
            });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::embedding_backend_unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding_backend_unavailable(format!(
                "{} returned {status}: {body}",
                self.label
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(Error::embedding_backend_unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let expected_dim = self
            .dimension()
            .or_else(|| parsed.data.first().map(|item| item.embedding.len()));

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            if let Some(d) = expected_dim {
                if item.embedding.len() != d {
                    return Err(Error::embedding_dimension_mismatch(d, item.embedding.len()));
                }
            }
            let mut v = item.embedding;
            normalize(&mut v);
            vectors.push(v);
        }

        if let Some(d) = expected_dim {
            let _ = self.dimension.set(d);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
