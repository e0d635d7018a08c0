//! Process configuration loaded from environment variables.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;
use tracing::warn;

use healthcast_core::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Names of the three job queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub data: String,
    pub chatbot: String,
    pub suggestion: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            data: "queue_data".to_string(),
            chatbot: "queue_chatbot".to_string(),
            suggestion: "queue_passive_suggestion".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisUrls {
    pub queue: String,
    pub cache: String,
    pub history: String,
}

impl Default for RedisUrls {
    fn default() -> Self {
        Self {
            queue: "redis://127.0.0.1:6379/0".to_string(),
            cache: "redis://127.0.0.1:6379/1".to_string(),
            history: "redis://127.0.0.1:6379/2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub worker_name: String,
    pub redis: RedisUrls,
    pub database_url: Option<String>,
    pub queues: QueueNames,
    pub weather_api_keys: Vec<String>,
    pub llm_api_keys: Vec<String>,
    pub retry: RetryPolicy,
    pub rate_limit_cooldown: Duration,
    pub http_timeout: Duration,
    pub liveness_interval: Duration,
    pub pop_timeout: Duration,
    pub result_ttl: Duration,
    pub max_history: usize,
    pub history_context: usize,
    pub local_offset: FixedOffset,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_name: format!("worker-{}", std::process::id()),
            redis: RedisUrls::default(),
            database_url: None,
            queues: QueueNames::default(),
            weather_api_keys: Vec::new(),
            llm_api_keys: Vec::new(),
            retry: RetryPolicy::default(),
            rate_limit_cooldown: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(1800),
            pop_timeout: Duration::from_secs(5),
            result_ttl: Duration::from_secs(1800),
            max_history: 10,
            history_context: 6,
            local_offset: vietnam_offset(),
        }
    }
}

/// UTC+7, no daylight saving.
pub fn vietnam_offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap_or(Utc.fix())
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables (tests, embedding).
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut config = Config::default();

        if let Some(name) = get("WORKER_NAME") {
            config.worker_name = name.to_string();
        }

        match get("REDIS_QUEUE_URL") {
            Some(url) => config.redis.queue = url.to_string(),
            None => warn!(default = %config.redis.queue, "REDIS_QUEUE_URL not set, using default"),
        }
        if let Some(url) = get("REDIS_CACHE_URL") {
            config.redis.cache = url.to_string();
        }
        if let Some(url) = get("REDIS_HISTORY_URL") {
            config.redis.history = url.to_string();
        }
        config.database_url = get("DATABASE_URL").map(str::to_string);

        if let Some(q) = get("QUEUE_DATA") {
            config.queues.data = q.to_string();
        }
        if let Some(q) = get("QUEUE_CHATBOT") {
            config.queues.chatbot = q.to_string();
        }
        if let Some(q) = get("QUEUE_PASSIVE_SUGGESTION") {
            config.queues.suggestion = q.to_string();
        }

        config.weather_api_keys = get("OPEN_WEATHER_API")
            .map(split_keys)
            .unwrap_or_default();

        config.llm_api_keys = match get("LLM_API_KEYS") {
            Some(list) => split_keys(list),
            // Numbered keys stop at the first gap.
            None => (0..12)
                .map_while(|i| get(&format!("API_GEMINI_{i}")).map(str::to_string))
                .collect(),
        };

        if let Some(v) = get("BASE_BACKOFF") {
            config.retry.base_delay = parse_seconds("BASE_BACKOFF", v)?;
        }
        if let Some(v) = get("MAX_RETRY") {
            config.retry.max_attempts = parse_number("MAX_RETRY", v)?;
        }
        if let Some(v) = get("RATE_LIMIT_COOLDOWN") {
            config.rate_limit_cooldown = parse_seconds("RATE_LIMIT_COOLDOWN", v)?;
        }
        if let Some(v) = get("HTTP_TIMEOUT") {
            config.http_timeout = parse_seconds("HTTP_TIMEOUT", v)?;
        }
        if let Some(v) = get("PING_INTERVAL") {
            config.liveness_interval = parse_seconds("PING_INTERVAL", v)?;
        }
        if let Some(v) = get("POP_TIMEOUT") {
            config.pop_timeout = parse_seconds("POP_TIMEOUT", v)?;
        }
        if let Some(v) = get("RESULT_TTL") {
            config.result_ttl = parse_seconds("RESULT_TTL", v)?;
        }
        if let Some(v) = get("MAX_HISTORY") {
            config.max_history = parse_number("MAX_HISTORY", v)?;
        }
        if let Some(v) = get("HISTORY_CONTEXT") {
            config.history_context = parse_number("HISTORY_CONTEXT", v)?;
        }

        if config.max_history == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_HISTORY",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.history_context > config.max_history {
            warn!(
                history_context = config.history_context,
                max_history = config.max_history,
                "HISTORY_CONTEXT exceeds MAX_HISTORY, clamping"
            );
            config.history_context = config.max_history;
        }

        Ok(config)
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn split_keys(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_seconds(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = value.parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{e}"),
    })?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployment() {
        let config = Config::from_vars(Vec::<(String, String)>::new()).unwrap();

        assert_eq!(config.queues.data, "queue_data");
        assert_eq!(config.redis.cache, "redis://127.0.0.1:6379/1");
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.liveness_interval, Duration::from_secs(1800));
        assert_eq!(config.result_ttl, Duration::from_secs(1800));
        assert_eq!(config.local_offset.local_minus_utc(), 7 * 3600);
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn keys_are_split_and_trimmed() {
        let config = Config::from_vars([
            ("OPEN_WEATHER_API", " a, b ,,c "),
            ("API_GEMINI_0", "g0"),
            ("API_GEMINI_1", "g1"),
            ("API_GEMINI_3", "ignored after gap"),
        ])
        .unwrap();

        assert_eq!(config.weather_api_keys, vec!["a", "b", "c"]);
        assert_eq!(config.llm_api_keys, vec!["g0", "g1"]);
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let config = Config::from_vars([
            ("BASE_BACKOFF", "0.25"),
            ("MAX_RETRY", "3"),
            ("MAX_HISTORY", "4"),
            ("HISTORY_CONTEXT", "6"),
        ])
        .unwrap();

        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.history_context, 4);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_vars([("MAX_RETRY", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_RETRY", .. }));

        let err = Config::from_vars([("BASE_BACKOFF", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BASE_BACKOFF", .. }));
    }
}
