//! Farming advisor backed by a hosted chat-completion API.
//!
//! The advisor never surfaces an error to its caller. A 429 from the API puts
//! it into a five-minute cool-down during which the API is not called at all;
//! any other failure, or a missing API key, falls back to the offline advice
//! table for that one message.

use crate::config::AdvisorConfig;
use crate::db;
use crate::errors::Result;
use crate::metrics::{ADVISOR_LIVE_REPLIES_TOTAL, ADVISOR_OFFLINE_REPLIES_TOTAL};
use crate::model::{FarmId, SensorKind};
use crate::offline_advice::advice_for;
use crate::status::classify;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Conversation turns sent along with each new message.
pub const HISTORY_TURNS: usize = 8;
pub const COOLDOWN: Duration = Duration::from_secs(5 * 60);
const MAX_TOKENS: u32 = 800;

#[derive(Debug, Clone, Error)]
pub enum AdvisorError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("json error: {0}")]
    Serde(String),
    #[error("empty reply")]
    EmptyReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub conditions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReading {
    pub kind: SensorKind,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmContext {
    pub name: String,
    pub location: String,
    pub readings: Vec<ContextReading>,
    pub weather: Option<Weather>,
    pub notes: String,
}

impl FarmContext {
    /// Farm details plus the latest value of each of its sensors.
    pub async fn load(pool: &PgPool, farm: FarmId, weather: Option<Weather>) -> Result<Option<Self>> {
        let Some(row) = db::farm_by_id(pool, farm).await? else {
            return Ok(None);
        };
        let readings = db::latest_farm_readings(pool, farm)
            .await?
            .into_iter()
            .map(|(kind, value)| ContextReading { kind, value })
            .collect();

        Ok(Some(Self {
            name: row.name,
            location: row.location,
            readings,
            weather,
            notes: row.notes,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    /// Quota exhausted, either just now or earlier within the cool-down.
    QuotaExceeded,
    Unavailable,
    NotConfigured,
}

impl OfflineReason {
    fn preface(self) -> &'static str {
        match self {
            OfflineReason::QuotaExceeded => {
                "The farming assistant has reached its usage limit and is in offline mode for a few minutes. \
                 Here is some general guidance in the meantime:"
            }
            OfflineReason::Unavailable => {
                "The farming assistant could not be reached, so here is some offline guidance:"
            }
            OfflineReason::NotConfigured => {
                "The farming assistant is not connected on this device. Offline guidance:"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvisorReply {
    pub content: String,
    pub offline: bool,
    pub reason: Option<OfflineReason>,
}

impl AdvisorReply {
    fn offline(reason: OfflineReason, message: &str) -> Self {
        ADVISOR_OFFLINE_REPLIES_TOTAL.inc();
        Self {
            content: format!("{}\n\n{}", reason.preface(), advice_for(message)),
            offline: true,
            reason: Some(reason),
        }
    }
}

pub fn system_prompt(context: Option<&FarmContext>) -> String {
    let mut prompt = String::from(
        "You are an agricultural advisor helping a farmer interpret sensor readings. \
         Give short, practical advice. If a reading is outside its optimal band, say what to do about it.",
    );

    let Some(ctx) = context else {
        return prompt;
    };

    let _ = write!(prompt, "\n\nFarm: {}", ctx.name);
    if !ctx.location.is_empty() {
        let _ = write!(prompt, " ({})", ctx.location);
    }

    if !ctx.readings.is_empty() {
        prompt.push_str("\nLatest readings:");
        for r in &ctx.readings {
            let status = classify(r.kind, r.value);
            let _ = write!(
                prompt,
                "\n- {}: {:.2}{} [{}]",
                r.kind.display_name(),
                r.value,
                r.kind.unit(),
                status.label
            );
        }
    }

    if let Some(w) = &ctx.weather {
        let _ = write!(
            prompt,
            "\nWeather: {}, {:.1} °C, {:.0}% humidity",
            w.conditions, w.temperature_c, w.humidity_pct
        );
    }

    if !ctx.notes.trim().is_empty() {
        let _ = write!(prompt, "\nFarmer's notes: {}", ctx.notes.trim());
    }

    prompt
}

/// System prompt, then the most recent `HISTORY_TURNS` turns, then `message`.
pub fn build_messages(context: Option<&FarmContext>, history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    std::iter::once(ChatMessage::system(system_prompt(context)))
        .chain(recent.iter().filter(|m| m.role != Role::System).cloned())
        .chain(std::iter::once(ChatMessage::user(message)))
        .collect()
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct Advisor {
    http: Client,
    config: AdvisorConfig,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Advisor {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(config: AdvisorConfig) -> std::result::Result<Self, AdvisorError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("farmwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdvisorError::Transport(e.to_string()))?;

        if config.api_key.is_none() {
            info!("No advisor API key configured, serving offline advice only");
        }

        Ok(Self {
            http,
            config,
            cooldown_until: Mutex::new(None),
        })
    }

    pub fn is_cooling_down(&self) -> bool {
        self.is_cooling_down_at(Instant::now())
    }

    fn is_cooling_down_at(&self, now: Instant) -> bool {
        match self.cooldown_until.lock() {
            Ok(until) => until.is_some_and(|t| now < t),
            Err(_) => false,
        }
    }

    fn start_cooldown_at(&self, now: Instant) {
        if let Ok(mut until) = self.cooldown_until.lock() {
            *until = Some(now + COOLDOWN);
        }
    }

    pub async fn chat(&self, context: Option<&FarmContext>, history: &[ChatMessage], message: &str) -> AdvisorReply {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return AdvisorReply::offline(OfflineReason::NotConfigured, message);
        };

        if self.is_cooling_down() {
            return AdvisorReply::offline(OfflineReason::QuotaExceeded, message);
        }

        let messages = build_messages(context, history, message);
        match self.complete(api_key, &messages).await {
            Ok(content) => {
                ADVISOR_LIVE_REPLIES_TOTAL.inc();
                AdvisorReply {
                    content,
                    offline: false,
                    reason: None,
                }
            }
            Err(AdvisorError::RateLimited) => {
                warn!("Advisor quota exceeded, offline for {}s", COOLDOWN.as_secs());
                self.start_cooldown_at(Instant::now());
                AdvisorReply::offline(OfflineReason::QuotaExceeded, message)
            }
            Err(e) => {
                warn!("Advisor request failed, using offline advice: {}", e);
                AdvisorReply::offline(OfflineReason::Unavailable, message)
            }
        }
    }

    async fn complete(&self, api_key: &str, messages: &[ChatMessage]) -> std::result::Result<String, AdvisorError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: MAX_TOKENS,
        };

        let res = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => {
                let body = res
                    .json::<CompletionResponse>()
                    .await
                    .map_err(|e| AdvisorError::Serde(e.to_string()))?;
                body.choices
                    .into_iter()
                    .find_map(|c| c.message.content)
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .ok_or(AdvisorError::EmptyReply)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(AdvisorError::RateLimited),
            StatusCode::UNAUTHORIZED => Err(AdvisorError::InvalidApiKey),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(AdvisorError::Http { status, body })
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AdvisorError {
    if e.is_timeout() {
        AdvisorError::Timeout
    } else {
        AdvisorError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> AdvisorConfig {
        AdvisorConfig {
            api_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            api_key: None,
            model: "test-model".to_string(),
        }
    }

    fn context() -> FarmContext {
        FarmContext {
            name: "North Field".to_string(),
            location: "Nakuru".to_string(),
            readings: vec![
                ContextReading {
                    kind: SensorKind::Ec,
                    value: 2.4,
                },
                ContextReading {
                    kind: SensorKind::SoilMoisture,
                    value: 48.0,
                },
            ],
            weather: Some(Weather {
                temperature_c: 27.5,
                humidity_pct: 61.0,
                conditions: "Partly cloudy".to_string(),
            }),
            notes: "Tomatoes planted last week".to_string(),
        }
    }

    #[test]
    fn test_system_prompt_includes_context() {
        let prompt = system_prompt(Some(&context()));
        assert!(prompt.contains("Farm: North Field (Nakuru)"));
        assert!(prompt.contains("Electrical conductivity: 2.40mS/cm [Too High]"));
        assert!(prompt.contains("Soil moisture: 48.00% [Optimal]"));
        assert!(prompt.contains("Partly cloudy, 27.5 °C, 61% humidity"));
        assert!(prompt.contains("Farmer's notes: Tomatoes planted last week"));
    }

    #[test]
    fn test_only_last_eight_turns_are_sent() {
        let history: Vec<ChatMessage> = (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect();

        let messages = build_messages(None, &history, "latest");
        assert_eq!(messages.len(), 1 + HISTORY_TURNS + 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "q4");
        assert_eq!(messages.last().unwrap(), &ChatMessage::user("latest"));
    }

    #[test]
    fn test_soil_question_without_key_is_offline_soil_advice() {
        tokio_test::block_on(async {
            let advisor = Advisor::new(offline_config()).unwrap();
            let reply = advisor.chat(None, &[], "Is my soil too dry?").await;

            assert!(reply.offline);
            assert_eq!(reply.reason, Some(OfflineReason::NotConfigured));
            assert!(reply.content.contains(advice_for("soil")));
            assert!(reply.content.contains("Soil and water:"));
        });
    }

    #[test]
    fn test_cooldown_expires_after_five_minutes() {
        let advisor = Advisor::new(offline_config()).unwrap();
        let now = Instant::now();
        assert!(!advisor.is_cooling_down_at(now));

        advisor.start_cooldown_at(now);
        assert!(advisor.is_cooling_down_at(now + Duration::from_secs(299)));
        assert!(!advisor.is_cooling_down_at(now + COOLDOWN));
    }
}
