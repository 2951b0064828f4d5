//! Cache-first access to the generated content: a fresh cache entry is
//! served as-is, a miss goes upstream and the result is written back.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use crate::cache::{cartoon_key, tts_key};
use crate::cartoon::CartoonClient;
use crate::config::{CacheConfig, Config, Secrets};
use crate::db::{AudioClip, Database};
use crate::error::{AppError, ClientError};
use crate::explain::Explainer;
use crate::retry::RetryPolicy;
use crate::speech::SpeechClient;

const MAX_HEADLINE_CHARS: usize = 500;
const MAX_SPEECH_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub cached: bool,
}

pub struct NewsService {
    db: Arc<Database>,
    explainer: Explainer,
    cartoons: CartoonClient,
    speech: SpeechClient,
    cache: CacheConfig,
}

impl NewsService {
    pub fn new(db: Arc<Database>, config: &Config, secrets: Secrets) -> Result<Self, ClientError> {
        let retry = RetryPolicy::from(&config.retry);
        Ok(Self {
            db,
            explainer: Explainer::new(config.openai.clone(), secrets.openai_api_key, retry)?,
            cartoons: CartoonClient::new(
                config.replicate.clone(),
                secrets.replicate_api_token,
                retry,
            )?,
            speech: SpeechClient::new(config.elevenlabs.clone(), secrets.elevenlabs_api_key, retry)?,
            cache: config.cache.clone(),
        })
    }

    pub async fn cartoon_for(&self, headline: &str) -> Result<Generated<String>, AppError> {
        let headline = validate_text(headline, "headline", MAX_HEADLINE_CHARS)?;
        let key = cartoon_key(headline);

        if let Some(image_url) = self.db.get_cartoon(&key).await? {
            return Ok(Generated {
                value: image_url,
                cached: true,
            });
        }

        let image_url = self.cartoons.generate(headline).await.map_err(|e| {
            warn!("Cartoon generation failed for '{}': {}", headline, e);
            e
        })?;
        self.db
            .put_cartoon(&key, headline, &image_url, Duration::hours(self.cache.cartoon_ttl_hours))
            .await?;
        info!("Cached cartoon for '{}'", headline);

        Ok(Generated {
            value: image_url,
            cached: false,
        })
    }

    pub async fn explanation_for(&self, headline: &str) -> Result<Generated<String>, AppError> {
        let headline = validate_text(headline, "headline", MAX_HEADLINE_CHARS)?;
        let key = cartoon_key(headline);

        if let Some(explanation) = self.db.get_explanation(&key).await? {
            return Ok(Generated {
                value: explanation,
                cached: true,
            });
        }

        let explanation = self.explainer.explain(headline).await.map_err(|e| {
            warn!("Explanation failed for '{}': {}", headline, e);
            e
        })?;
        self.db
            .put_explanation(
                &key,
                headline,
                &explanation,
                Duration::hours(self.cache.explanation_ttl_hours),
            )
            .await?;

        Ok(Generated {
            value: explanation,
            cached: false,
        })
    }

    /// Speech for `text` in `voice_id`, or the configured default voice.
    pub async fn speech_for(
        &self,
        text: &str,
        voice_id: Option<&str>,
    ) -> Result<Generated<AudioClip>, AppError> {
        let text = validate_text(text, "text", MAX_SPEECH_CHARS)?;
        let voice_id = match voice_id.map(str::trim).filter(|v| !v.is_empty()) {
            Some(voice) => voice,
            None => self.speech.default_voice(),
        };
        if !voice_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AppError::BadRequest(format!("invalid voice id '{}'", voice_id)));
        }

        let hash = tts_key(text);
        if let Some(clip) = self.db.get_tts(&hash, voice_id).await? {
            return Ok(Generated {
                value: clip,
                cached: true,
            });
        }

        let clip = self.speech.synthesize(text, voice_id).await.map_err(|e| {
            warn!("Speech synthesis failed: {}", e);
            e
        })?;
        self.db
            .put_tts(&hash, voice_id, &clip, Duration::hours(self.cache.tts_ttl_hours))
            .await?;

        Ok(Generated {
            value: clip,
            cached: false,
        })
    }
}

fn validate_text<'a>(text: &'a str, field: &str, max_chars: usize) -> Result<&'a str, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    if text.chars().count() > max_chars {
        return Err(AppError::BadRequest(format!(
            "{} is longer than {} characters",
            field, max_chars
        )));
    }
    Ok(text)
}
