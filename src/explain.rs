//! Plain-language explanations from the OpenAI chat completions API.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::error::ClientError;
use crate::retry::{retry_fixed, RetryPolicy};

const SYSTEM_PROMPT: &str = "You explain news headlines to children aged 5 to 8. \
Use two or three short sentences and simple everyday words. Be calm and kind, \
never frightening. Do not invent facts beyond the headline.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

pub struct Explainer {
    client: Client,
    config: OpenAiConfig,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl Explainer {
    pub fn new(
        config: OpenAiConfig,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            config,
            api_key,
            retry,
        })
    }

    pub async fn explain(&self, headline: &str) -> Result<String, ClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ClientError::MissingKey("OPENAI_API_KEY"))?;

        let prompt = format!("Explain this headline: {}", headline);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: 0.7,
        };
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let client = &self.client;
        let request = &request;
        let url = url.as_str();
        let response: ChatResponse = retry_fixed(
            self.retry,
            "openai chat completion",
            ClientError::is_retryable,
            move || async move {
                let response = client
                    .post(url)
                    .bearer_auth(api_key)
                    .json(request)
                    .send()
                    .await?;
                Ok::<ChatResponse, ClientError>(ClientError::check(response).await?.json().await?)
            },
        )
        .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(ClientError::EmptyResponse)?;

        debug!("Explained '{}' in {} chars", headline, text.len());
        Ok(text)
    }
}
