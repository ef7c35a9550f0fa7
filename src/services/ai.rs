use crate::domain::submission::DraftPrompt;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

pub const MANUAL_FALLBACK: &str = "无法生成报告，请手动填写。";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("draft generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("draft service rejected the API key")]
    Unauthorized,
    #[error("draft service quota or rate limit reached")]
    Quota,
    #[error("draft service returned no usable text")]
    Malformed,
    #[error("draft generation is not configured")]
    Disabled,
    #[error("draft service unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    fn retryable(&self) -> bool {
        matches!(self, GenerationError::Unavailable(_))
    }
}

#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate(&self, prompt: &DraftPrompt) -> Result<String, GenerationError>;
}

/// OpenAI-compatible chat completion endpoint (the default base URL points
/// at SiliconFlow).
#[derive(Clone)]
pub struct OpenAiDrafts {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiDrafts {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new().with_api_base(api_base).with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    async fn complete(&self, prompt: &DraftPrompt) -> Result<String, GenerationError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(prompt.system)
                .build()
                .map_err(classify)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.user.clone())
                .build()
                .map_err(classify)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .build()
            .map_err(classify)?;

        let resp = self.client.chat().create(request).await.map_err(classify)?;
        resp.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(GenerationError::Malformed)
    }
}

fn classify(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::ApiError(api) => {
            let message = api.message.to_lowercase();
            if message.contains("api key") || message.contains("unauthorized") || message.contains("401") {
                GenerationError::Unauthorized
            } else if message.contains("quota") || message.contains("rate limit") || message.contains("429") {
                GenerationError::Quota
            } else {
                GenerationError::Unavailable(api.message)
            }
        }
        OpenAIError::JSONDeserialize(_) => GenerationError::Malformed,
        other => GenerationError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl DraftGenerator for OpenAiDrafts {
    async fn generate(&self, prompt: &DraftPrompt) -> Result<String, GenerationError> {
        let mut retries = 0;
        loop {
            match self.complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if err.retryable() && retries < 2 => {
                    retries += 1;
                    tracing::warn!("Draft request failed ({}), retry {}", err, retries);
                    sleep(Duration::from_millis(500 * retries)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Used when no API key is configured.
pub struct DisabledDrafts;

#[async_trait]
impl DraftGenerator for DisabledDrafts {
    async fn generate(&self, _prompt: &DraftPrompt) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DraftOutcome {
    Ready { draft: String },
    /// Advisory only: the form can still be submitted without a draft.
    Failed { reason: String, message: &'static str },
}

impl DraftOutcome {
    pub fn draft(&self) -> Option<&str> {
        match self {
            DraftOutcome::Ready { draft } => Some(draft),
            DraftOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct DraftService {
    generator: Arc<dyn DraftGenerator>,
    limit: Duration,
}

impl DraftService {
    pub fn new(generator: Arc<dyn DraftGenerator>, limit: Duration) -> Self {
        Self { generator, limit }
    }

    /// Never fails: errors and timeouts resolve to [`DraftOutcome::Failed`].
    pub async fn draft(&self, prompt: &DraftPrompt) -> DraftOutcome {
        let result = match timeout(self.limit, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.limit)),
        };
        match result {
            Ok(draft) => {
                tracing::info!("Generated {} draft ({} chars)", prompt.kind.as_str(), draft.chars().count());
                DraftOutcome::Ready { draft }
            }
            Err(err) => {
                tracing::warn!("Draft generation for {} failed: {}", prompt.kind.as_str(), err);
                DraftOutcome::Failed {
                    reason: err.to_string(),
                    message: MANUAL_FALLBACK,
                }
            }
        }
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    pub struct FixedDraft(pub &'static str);

    #[async_trait]
    impl DraftGenerator for FixedDraft {
        async fn generate(&self, _prompt: &DraftPrompt) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    pub struct FailingDraft(pub GenerationError);

    #[async_trait]
    impl DraftGenerator for FailingDraft {
        async fn generate(&self, _prompt: &DraftPrompt) -> Result<String, GenerationError> {
            Err(self.0.clone())
        }
    }

    pub struct SlowDraft(pub Duration);

    #[async_trait]
    impl DraftGenerator for SlowDraft {
        async fn generate(&self, _prompt: &DraftPrompt) -> Result<String, GenerationError> {
            sleep(self.0).await;
            Ok("迟到的草稿".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::domain::models::ReportKind;

    fn prompt() -> DraftPrompt {
        DraftPrompt {
            kind: ReportKind::Hazard,
            system: "system",
            user: "隐患级别：一般".into(),
        }
    }

    #[tokio::test]
    async fn ready_draft_passes_through() {
        let service = DraftService::new(Arc::new(FixedDraft("整改通知书")), Duration::from_secs(1));
        assert_eq!(service.draft(&prompt()).await.draft(), Some("整改通知书"));
    }

    #[tokio::test]
    async fn errors_become_failed_outcomes() {
        let service = DraftService::new(Arc::new(FailingDraft(GenerationError::Quota)), Duration::from_secs(1));
        match service.draft(&prompt()).await {
            DraftOutcome::Failed { message, reason } => {
                assert_eq!(message, MANUAL_FALLBACK);
                assert!(reason.contains("quota"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_generator_times_out() {
        let service = DraftService::new(Arc::new(SlowDraft(Duration::from_secs(5))), Duration::from_millis(20));
        let outcome = service.draft(&prompt()).await;
        assert!(matches!(outcome, DraftOutcome::Failed { ref reason, .. } if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn disabled_generator_fails_softly() {
        let service = DraftService::new(Arc::new(DisabledDrafts), Duration::from_secs(1));
        assert!(service.draft(&prompt()).await.draft().is_none());
    }
}
