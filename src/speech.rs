//! Text-to-speech through the ElevenLabs API.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::ElevenLabsConfig;
use crate::db::AudioClip;
use crate::error::ClientError;
use crate::retry::{retry_fixed, RetryPolicy};

const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

pub struct SpeechClient {
    client: Client,
    config: ElevenLabsConfig,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl SpeechClient {
    pub fn new(
        config: ElevenLabsConfig,
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

    pub fn default_voice(&self) -> &str {
        &self.config.default_voice_id
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioClip, ClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ClientError::MissingKey("ELEVENLABS_API_KEY"))?;

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            voice_id
        );
        let request = SpeechRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        let client = &self.client;
        let url = url.as_str();
        let request = &request;
        let clip = retry_fixed(
            self.retry,
            "elevenlabs text-to-speech",
            ClientError::is_retryable,
            move || async move {
                let response = client
                    .post(url)
                    .header("xi-api-key", api_key)
                    .header(ACCEPT, DEFAULT_CONTENT_TYPE)
                    .json(request)
                    .send()
                    .await?;
                let response = ClientError::check(response).await?;
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let audio = response.bytes().await?.to_vec();
                Ok::<AudioClip, ClientError>(AudioClip {
                    audio,
                    content_type,
                })
            },
        )
        .await?;

        if clip.audio.is_empty() {
            return Err(ClientError::EmptyResponse);
        }

        debug!("Synthesized {} bytes with voice {}", clip.audio.len(), voice_id);
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_client(base_url: &str, key: Option<&str>) -> SpeechClient {
        let config = ElevenLabsConfig {
            base_url: base_url.to_string(),
            ..ElevenLabsConfig::default()
        };
        SpeechClient::new(config, key.map(|k| k.to_string()), RetryPolicy::none()).unwrap()
    }

    #[tokio::test]
    async fn test_synthesize_returns_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/voice-1"))
            .and(header("xi-api-key", "el-test"))
            .and(body_partial_json(json!({ "text": "Hello kids" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(vec![0x49, 0x44, 0x33]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = create_client(&server.uri(), Some("el-test"));
        let clip = client.synthesize("Hello kids", "voice-1").await.unwrap();

        assert_eq!(clip.audio, vec![0x49, 0x44, 0x33]);
        assert_eq!(clip.content_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_empty_audio_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = create_client(&server.uri(), Some("el-test"));
        let err = client.synthesize("Hello", "voice-1").await.unwrap_err();

        assert!(matches!(err, ClientError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2]))
            .mount(&server)
            .await;

        let config = ElevenLabsConfig {
            base_url: server.uri(),
            ..ElevenLabsConfig::default()
        };
        let retry = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(5),
        };
        let client = SpeechClient::new(config, Some("el-test".to_string()), retry).unwrap();

        let clip = client.synthesize("Hello", "voice-1").await.unwrap();
        assert_eq!(clip.audio, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let client = create_client("http://localhost:1", None);
        let err = client.synthesize("Hello", "voice-1").await.unwrap_err();
        assert!(matches!(err, ClientError::MissingKey("ELEVENLABS_API_KEY")));
    }
}
