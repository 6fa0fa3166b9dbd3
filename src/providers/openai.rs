//! `OpenAI`-backed collaborators using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, local proxies)
//! via the base URL override. Provides the embedding provider for the
//! selector/cache stack and the synthesis LLM for the mixer.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, CreateEmbeddingRequest,
    EmbeddingInput,
};
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::MoeError;
use crate::provider::SynthesisLlm;

/// Default embedding model.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Default synthesis model.
const DEFAULT_SYNTHESIS_MODEL: &str = "gpt-4o-mini";
/// Default synthesis response budget.
const DEFAULT_SYNTHESIS_MAX_TOKENS: u32 = 4096;

/// System message framing the synthesis request.
const SYNTHESIS_SYSTEM_MESSAGE: &str =
    "You combine multiple expert answers into one response, following the \
     instructions in the user message exactly. Preserve fenced JSON blocks \
     byte for byte.";

fn build_client(api_key: &str, base_url: Option<&str>) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base_url) = base_url {
        config = config.with_api_base(base_url);
    }
    Client::with_config(config)
}

/// Embedding provider backed by the `OpenAI` embeddings endpoint.
pub struct OpenAiEmbeddings {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbeddings {
    /// Creates a provider for the default embedding model.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self::with_model(api_key, base_url, DEFAULT_EMBEDDING_MODEL)
    }

    /// Creates a provider for a specific embedding model.
    #[must_use]
    pub fn with_model(api_key: &str, base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self {
            client: build_client(api_key, base_url),
            model: model.into(),
        }
    }

    async fn request(&self, input: EmbeddingInput) -> Result<Vec<Vec<f32>>, MoeError> {
        let request = CreateEmbeddingRequest {
            model: self.model.clone(),
            input,
            ..Default::default()
        };

        let response = self.client.embeddings().create(request).await.map_err(|e| {
            MoeError::EmbeddingUnavailable {
                message: e.to_string(),
            }
        })?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MoeError> {
        let mut vectors = self
            .request(EmbeddingInput::String(text.to_string()))
            .await?;
        vectors.pop().ok_or_else(|| MoeError::EmbeddingUnavailable {
            message: "embedding response contained no vectors".to_string(),
        })
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(EmbeddingInput::StringArray(texts.to_vec()))
            .await?;
        if vectors.len() != texts.len() {
            return Err(MoeError::EmbeddingUnavailable {
                message: format!(
                    "embedding response contained {} vectors for {} inputs",
                    vectors.len(),
                    texts.len()
                ),
            });
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Synthesis LLM backed by the `OpenAI` chat completions endpoint.
pub struct OpenAiSynthesis {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
}

impl OpenAiSynthesis {
    /// Creates a synthesizer for the default model.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self::with_model(api_key, base_url, DEFAULT_SYNTHESIS_MODEL)
    }

    /// Creates a synthesizer for a specific chat model.
    #[must_use]
    pub fn with_model(api_key: &str, base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self {
            client: build_client(api_key, base_url),
            model: model.into(),
            max_tokens: DEFAULT_SYNTHESIS_MAX_TOKENS,
        }
    }

    /// Sets the response token budget.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl SynthesisLlm for OpenAiSynthesis {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn synthesize(&self, prompt: &str) -> Result<String, MoeError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(
                    SYNTHESIS_SYSTEM_MESSAGE.to_string(),
                ),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            }),
        ];

        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_completion_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| MoeError::Synthesis {
                message: e.to_string(),
            })?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| MoeError::Synthesis {
                message: "chat completion contained no content".to_string(),
            })
    }
}

impl std::fmt::Debug for OpenAiSynthesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSynthesis")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_default_model() {
        let provider = OpenAiEmbeddings::new("test-key", None);
        assert_eq!(provider.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_embeddings_custom_model_and_base() {
        let provider =
            OpenAiEmbeddings::with_model("k", Some("http://localhost:8080/v1"), "custom-model");
        assert_eq!(provider.model, "custom-model");
    }

    #[test]
    fn test_synthesis_builder() {
        let synthesis = OpenAiSynthesis::new("k", None).with_max_tokens(1024);
        assert_eq!(synthesis.model, DEFAULT_SYNTHESIS_MODEL);
        assert_eq!(synthesis.max_tokens, 1024);
        assert_eq!(synthesis.name(), "openai");
    }

    #[tokio::test]
    async fn test_embed_many_empty_input_short_circuits() {
        let provider = OpenAiEmbeddings::new("test-key", None);
        let vectors = provider
            .embed_many(&[])
            .await
            .unwrap_or_else(|_| vec![vec![1.0]]);
        assert!(vectors.is_empty());
    }
}
