use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::advisor::controller::{ControllerOptions, ConversationMode};
use crate::advisor::prompts::system_template;
use crate::advisor::schema::MalformedPolicy;
use crate::llm_client::backoff_delay;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "mistralai/devstral-small:free";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Settings for the chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Transport-level retries on 408/429/5xx. Zero means one attempt.
    pub max_retries: u32,
}

impl LlmConfig {
    /// Worst-case duration of one `complete` call: every attempt running to
    /// the per-request timeout, plus the backoff between attempts.
    pub fn call_budget(&self) -> Duration {
        let attempts = self.timeout.saturating_mul(self.max_retries.saturating_add(1));
        (1..=self.max_retries)
            .map(backoff_delay)
            .fold(attempts, Duration::saturating_add)
    }
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub malformed_policy: MalformedPolicy,
    pub conversation_mode: ConversationMode,
    pub max_turns: Option<usize>,
    pub career_paths: Vec<String>,
    /// HTTP sessions idle this long are evicted.
    pub session_ttl: Duration,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        let timeout_secs = match var("LLM_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .context("LLM_TIMEOUT_SECS must be a whole number of seconds")?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let max_retries = match var("LLM_MAX_RETRIES") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .context("LLM_MAX_RETRIES must be a non-negative integer")?,
            None => 0,
        };

        let session_ttl_secs = match var("ADVISOR_SESSION_TTL_SECS") {
            Some(v) => parse_session_ttl(&v)?,
            None => DEFAULT_SESSION_TTL_SECS,
        };

        let max_turns = match var("ADVISOR_MAX_TURNS") {
            Some(v) => Some(parse_max_turns(&v)?),
            None => None,
        };

        Ok(Config {
            llm: LlmConfig {
                api_key: require("OPENROUTER_API_KEY")?,
                base_url: var("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: var("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
                max_retries,
            },
            malformed_policy: var("ADVISOR_MALFORMED_POLICY")
                .map(|v| v.parse::<MalformedPolicy>())
                .transpose()
                .map_err(|e| anyhow!(e))?
                .unwrap_or_default(),
            conversation_mode: var("ADVISOR_CONVERSATION_MODE")
                .map(|v| v.parse::<ConversationMode>())
                .transpose()
                .map_err(|e| anyhow!(e))?
                .unwrap_or_default(),
            max_turns,
            career_paths: var("ADVISOR_CAREER_PATHS")
                .map(|v| parse_career_paths(&v))
                .unwrap_or_default(),
            session_ttl: Duration::from_secs(session_ttl_secs),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            system_template: system_template(&self.career_paths),
            malformed_policy: self.malformed_policy,
            conversation_mode: self.conversation_mode,
            max_turns: self.max_turns,
            request_timeout: self.llm.call_budget(),
        }
    }
}

/// Splits a comma-separated list, dropping blanks.
fn parse_career_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_session_ttl(raw: &str) -> Result<u64> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .context("ADVISOR_SESSION_TTL_SECS must be a whole number of seconds")?;
    if secs == 0 {
        return Err(anyhow!("ADVISOR_SESSION_TTL_SECS must be at least 1"));
    }
    Ok(secs)
}

fn parse_max_turns(raw: &str) -> Result<usize> {
    let max = raw
        .trim()
        .parse::<usize>()
        .context("ADVISOR_MAX_TURNS must be a positive integer")?;
    if max == 0 {
        return Err(anyhow!("ADVISOR_MAX_TURNS must be at least 1"));
    }
    Ok(max)
}
