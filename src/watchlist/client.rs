//! HTTP client for the external watchlist provider (spec §4.4, §6).
//!
//! Grounded on
//! `original_source/server/src/modules/watchlist/api_client.py`: auth-header
//! construction over `none`/`bearer`/`apikey`/`basic`, `fetch_vessels`/
//! `fetch_lists`/`fetch_all`, and `update_vessel_by_imo`. The Python side
//! wraps calls in `tenacity.retry(stop_after_attempt(3),
//! wait_exponential(...))`; there's no equivalent crate in the teacher's
//! stack, so the retry loop here is hand-rolled over the same policy.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::store::{ListRecord, VesselRecord};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub enum AuthConfig {
    None,
    Bearer(String),
    ApiKey(String),
    Basic { username: String, password: String },
}

#[derive(Debug, Clone)]
pub struct WatchlistClientConfig {
    pub base_url: String,
    pub auth: AuthConfig,
    pub timeout: Duration,
}

pub struct WatchlistClient {
    http: Client,
    config: WatchlistClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchlistClientError {
    #[error("watchlist provider request failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("watchlist provider returned unexpected status {0}")]
    BadStatus(StatusCode),
}

impl WatchlistClient {
    pub fn new(config: WatchlistClientConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            AuthConfig::None => builder,
            AuthConfig::Bearer(token) => builder.bearer_auth(token),
            AuthConfig::ApiKey(key) => builder.header("X-API-Key", key),
            AuthConfig::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn fetch_endpoint(&self, path: &str) -> Result<Vec<Value>, WatchlistClientError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self.apply_auth(self.http.get(&url));
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<Vec<Value>>()
                        .await
                        .map_err(|source| WatchlistClientError::Exhausted { attempts: attempt, source });
                }
                Ok(response) if attempt >= MAX_ATTEMPTS => {
                    return Err(WatchlistClientError::BadStatus(response.status()));
                }
                Ok(response) => {
                    warn!(status = %response.status(), url = %url, attempt, "watchlist fetch retrying");
                }
                Err(e) if attempt >= MAX_ATTEMPTS => {
                    return Err(WatchlistClientError::Exhausted { attempts: attempt, source: e });
                }
                Err(e) => {
                    warn!(error = %e, url = %url, attempt, "watchlist fetch retrying");
                }
            }
            tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
        }
    }

    pub async fn fetch_vessels(&self) -> Result<Vec<VesselRecord>, WatchlistClientError> {
        let raw = self.fetch_endpoint("/vessels").await?;
        Ok(raw.iter().filter_map(parse_vessel).collect())
    }

    pub async fn fetch_lists(&self) -> Result<Vec<ListRecord>, WatchlistClientError> {
        let raw = self.fetch_endpoint("/lists").await?;
        Ok(raw.iter().filter_map(parse_list).collect())
    }

    pub async fn fetch_all(&self) -> Result<(Vec<ListRecord>, Vec<VesselRecord>), WatchlistClientError> {
        let (lists, vessels) = tokio::join!(self.fetch_lists(), self.fetch_vessels());
        Ok((lists?, vessels?))
    }

    /// Best-effort push-back when a watchlist match came in via IMO but the
    /// message also carried an MMSI (spec §4.4). Failures are logged, never
    /// propagated — the dispatcher must not stall on this.
    pub async fn update_vessel_by_imo(&self, imo: &str, mmsi: &str) {
        let url = format!("{}/vessels/update-by-imo/{imo}", self.config.base_url);
        let body = serde_json::json!({ "mmsi": mmsi });
        let request = self.apply_auth(self.http.put(&url)).json(&body);
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(imo, mmsi, "pushed vessel update to watchlist provider");
            }
            Ok(response) => {
                warn!(imo, mmsi, status = %response.status(), "watchlist push-back rejected");
            }
            Err(e) => {
                warn!(imo, mmsi, error = %e, "watchlist push-back failed");
            }
        }
    }
}

fn parse_vessel(value: &Value) -> Option<VesselRecord> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(alias = "list_id", alias = "listId")]
        list_id: Option<String>,
        #[serde(alias = "id")]
        id: Option<String>,
        mmsi: Option<String>,
        imo: Option<String>,
    }
    let raw: Raw = serde_json::from_value(value.clone()).ok()?;
    let list_id = raw.list_id.or(raw.id)?;
    Some(VesselRecord {
        list_id,
        mmsi: raw.mmsi,
        imo: raw.imo,
    })
}

fn parse_list(value: &Value) -> Option<ListRecord> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(alias = "list_id", alias = "id")]
        list_id: Option<String>,
        #[serde(alias = "listName", alias = "name")]
        list_name: Option<String>,
        color: Option<String>,
    }
    let raw: Raw = serde_json::from_value(value.clone()).ok()?;
    Some(ListRecord {
        list_id: raw.list_id?,
        list_name: raw.list_name,
        color: raw.color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_vessel_accepts_camel_case_aliases() {
        let value = serde_json::json!({ "listId": "l1", "mmsi": "111" });
        let vessel = parse_vessel(&value).unwrap();
        assert_eq!(vessel.list_id, "l1");
        assert_eq!(vessel.mmsi.as_deref(), Some("111"));
    }

    #[test]
    fn parse_list_falls_back_to_plain_id_and_name() {
        let value = serde_json::json!({ "id": "l2", "name": "Sanctioned" });
        let list = parse_list(&value).unwrap();
        assert_eq!(list.list_id, "l2");
        assert_eq!(list.list_name.as_deref(), Some("Sanctioned"));
    }

    #[test]
    fn parse_vessel_without_list_id_is_rejected() {
        let value = serde_json::json!({ "mmsi": "111" });
        assert!(parse_vessel(&value).is_none());
    }
}
