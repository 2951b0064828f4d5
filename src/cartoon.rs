//! Cartoon generation through Replicate predictions.
//!
//! A prediction is created and then polled on a fixed interval until it
//! settles. `model_version` is either a version hash or an
//! `owner/model` name; the two use different create endpoints.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::ReplicateConfig;
use crate::error::ClientError;
use crate::retry::{retry_fixed, RetryPolicy};

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
}

/// Replicate models return either a single URL or a list of them.
fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) if !url.is_empty() => Some(url.clone()),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .find(|s| !s.is_empty())
            .map(|s| s.to_string()),
        _ => None,
    }
}

pub struct CartoonClient {
    client: Client,
    config: ReplicateConfig,
    api_token: Option<String>,
    retry: RetryPolicy,
}

impl CartoonClient {
    pub fn new(
        config: ReplicateConfig,
        api_token: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            config,
            api_token,
            retry,
        })
    }

    pub fn prompt_for(&self, headline: &str) -> String {
        self.config.prompt_template.replace("{headline}", headline)
    }

    /// Generate a cartoon for `headline` and return the image URL.
    pub async fn generate(&self, headline: &str) -> Result<String, ClientError> {
        let token = self
            .api_token
            .as_deref()
            .ok_or(ClientError::MissingKey("REPLICATE_API_TOKEN"))?;

        let mut prediction = self.create(token, &self.prompt_for(headline)).await?;
        info!("Started prediction {} for '{}'", prediction.id, headline);

        let mut polls = 0;
        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    return first_output_url(&prediction.output).ok_or(ClientError::EmptyResponse);
                }
                "failed" | "canceled" => {
                    let message = match &prediction.error {
                        Value::String(s) => s.clone(),
                        Value::Null => "no error message".to_string(),
                        other => other.to_string(),
                    };
                    return Err(ClientError::PredictionFailed {
                        id: prediction.id,
                        status: prediction.status,
                        message,
                    });
                }
                _ => {}
            }

            if polls >= self.config.max_polls {
                return Err(ClientError::Timeout(prediction.id));
            }

            tokio::time::sleep(self.config.poll_interval()).await;
            polls += 1;
            prediction = self.fetch(token, &prediction.id).await?;
            debug!(
                "Prediction {} is {} after {} polls",
                prediction.id, prediction.status, polls
            );
        }
    }

    fn create_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if self.config.model_version.contains('/') {
            format!("{}/v1/models/{}/predictions", base, self.config.model_version)
        } else {
            format!("{}/v1/predictions", base)
        }
    }

    fn create_body(&self, prompt: &str) -> Value {
        let input = json!({ "prompt": prompt, "aspect_ratio": "1:1", "output_format": "png" });
        if self.config.model_version.contains('/') {
            json!({ "input": input })
        } else {
            json!({ "version": self.config.model_version, "input": input })
        }
    }

    async fn create(&self, token: &str, prompt: &str) -> Result<Prediction, ClientError> {
        let url = self.create_url();
        let body = self.create_body(prompt);

        let client = &self.client;
        let url = url.as_str();
        let body = &body;
        retry_fixed(
            self.retry,
            "replicate create prediction",
            ClientError::is_retryable,
            move || async move {
                let response = client.post(url).bearer_auth(token).json(body).send().await?;
                Ok::<Prediction, ClientError>(ClientError::check(response).await?.json().await?)
            },
        )
        .await
    }

    async fn fetch(&self, token: &str, id: &str) -> Result<Prediction, ClientError> {
        let url = format!(
            "{}/v1/predictions/{}",
            self.config.base_url.trim_end_matches('/'),
            id
        );

        let client = &self.client;
        let url = url.as_str();
        retry_fixed(
            self.retry,
            "replicate poll prediction",
            ClientError::is_retryable,
            move || async move {
                let response = client.get(url).bearer_auth(token).send().await?;
                Ok::<Prediction, ClientError>(ClientError::check(response).await?.json().await?)
            },
        )
        .await
    }
}
