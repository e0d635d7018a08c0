use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use healthcast_core::RetryPolicy;

use crate::config::Config;
use crate::pool::{Acquire, ResourcePool};

use super::FetchError;

/// Query parameter carrying the API key.
const KEY_PARAM: &str = "appid";

/// GET client that spreads requests over a pool of API keys.
///
/// - 200: the JSON body is returned.
/// - 429: the key cools down for `cooldown` and the attempt counts as failed.
/// - Any other status or a transport error: the attempt counts as failed.
///
/// Failed attempts sleep `retry.delay_for_attempt(n)` before the next key.
/// Waiting for a cooldown when every key is blocked does not use an attempt.
#[derive(Debug)]
pub struct KeyedHttpClient {
    http: reqwest::Client,
    keys: ResourcePool<String>,
    retry: RetryPolicy,
    cooldown: Duration,
}

impl KeyedHttpClient {
    pub fn new(
        keys: Vec<String>,
        retry: RetryPolicy,
        cooldown: Duration,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let keys = ResourcePool::new(keys).map_err(|_| FetchError::NoKeys)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self {
            http,
            keys,
            retry,
            cooldown,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            config.weather_api_keys.clone(),
            config.retry.clone(),
            config.rate_limit_cooldown,
            config.http_timeout,
        )
    }

    pub fn keys(&self) -> &ResourcePool<String> {
        &self.keys
    }

    /// GET `url` with `params` plus a key from the pool.
    pub async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, FetchError> {
        let mut attempt = 0;

        while self.retry.should_retry(attempt) {
            let lease = match self.keys.acquire_ready() {
                Acquire::Ready(lease) => lease,
                Acquire::AllBlocked { retry_after } => {
                    warn!(wait_ms = retry_after.as_millis() as u64, "all API keys cooling down");
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
            };

            let sent = self
                .http
                .get(url)
                .query(params)
                .query(&[(KEY_PARAM, lease.value.as_str())])
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().await.map_err(|e| FetchError::Decode(e.to_string()));
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!(slot = lease.index, cooldown_s = self.cooldown.as_secs(), "API key rate limited");
                    self.keys.block_for(lease.index, self.cooldown);
                }
                Ok(resp) => {
                    warn!(url, status = resp.status().as_u16(), "upstream error");
                }
                Err(e) => {
                    warn!(url, error = %e, "request failed");
                }
            }

            attempt += 1;
            if self.retry.should_retry(attempt) {
                let delay = self.retry.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
            }
        }

        Err(FetchError::Exhausted { attempts: attempt })
    }

    /// Single GET without a key, for endpoints that need none.
    pub async fn get_json_unkeyed(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Value, FetchError> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        resp.json().await.map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(keys: &[&str], attempts: u32, cooldown: Duration) -> KeyedHttpClient {
        KeyedHttpClient::new(
            keys.iter().map(|k| k.to_string()).collect(),
            RetryPolicy::fixed(attempts, Duration::from_millis(1)),
            cooldown,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn empty_key_list_is_rejected() {
        let err = KeyedHttpClient::new(
            Vec::new(),
            RetryPolicy::default(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        )
        .unwrap_err();
        assert_eq!(err, FetchError::NoKeys);
    }

    #[tokio::test]
    async fn rate_limited_key_is_skipped_for_the_next_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("appid", "k0"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("appid", "k1"))
            .and(query_param("id", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"list": []})))
            .mount(&server)
            .await;

        let client = client(&["k0", "k1"], 5, Duration::from_secs(60));
        let body = client
            .get_json(&format!("{}/forecast", server.uri()), &[("id", "5".to_string())])
            .await
            .unwrap();

        assert_eq!(body, json!({"list": []}));
        assert_eq!(client.keys().blocked_count(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = client(&["only"], 5, Duration::from_secs(60));
        let body = client.get_json(&server.uri(), &[]).await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(client.keys().blocked_count(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        // Short cooldown so the "all blocked" wait stays small.
        let client = client(&["k0", "k1"], 3, Duration::from_millis(20));
        let err = client.get_json(&server.uri(), &[]).await.unwrap_err();
        assert_eq!(err, FetchError::Exhausted { attempts: 3 });
    }

    #[tokio::test]
    async fn unkeyed_request_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uvi"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client(&["k0"], 1, Duration::from_secs(60));
        let err = client
            .get_json_unkeyed(&format!("{}/uvi", server.uri()), &[])
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status { status: 500 });
    }

    #[tokio::test]
    async fn non_json_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client(&["k0"], 2, Duration::from_secs(60));
        let err = client.get_json(&server.uri(), &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
