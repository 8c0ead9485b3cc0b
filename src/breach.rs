//! Breach history client for the Have I Been Pwned v3 API.
//!
//! One `GET {api_url}/breachedaccount/{email}?truncateResponse=false` per
//! call, no retry. Each upstream breach is reduced to the summary fields the
//! query API exposes.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{BreachConfig, BREACH_API_KEY_ENV};

#[derive(Debug, Error)]
pub enum BreachError {
    #[error("breach lookups need an API key: set [breach].api_key or {BREACH_API_KEY_ENV}")]
    NotConfigured,
    #[error("breach API: {0}")]
    Upstream(String),
    #[error("breach API request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Summary of one breach an account appears in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Breach {
    pub title: String,
    pub domain: String,
    pub date: String,
    pub count: u64,
    pub description: String,
    pub logo_path: String,
}

/// Fields of an upstream breach model that we keep.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BreachModel {
    #[serde(default)]
    title: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    breach_date: String,
    #[serde(default)]
    pwn_count: u64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    logo_path: String,
}

impl From<BreachModel> for Breach {
    fn from(model: BreachModel) -> Self {
        Self {
            title: model.title,
            domain: model.domain,
            date: model.breach_date,
            count: model.pwn_count,
            description: model.description,
            logo_path: model.logo_path,
        }
    }
}

pub struct BreachClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl BreachClient {
    pub fn new(config: &BreachConfig) -> Result<Self, BreachError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Returns every breach `email` appears in. An account with no breaches
    /// (upstream 404) yields an empty list.
    pub async fn breached_account(&self, email: &str) -> Result<Vec<Breach>, BreachError> {
        let api_key = self.api_key.as_deref().ok_or(BreachError::NotConfigured)?;

        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| BreachError::Upstream(format!("invalid api_url '{}': {}", self.api_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| BreachError::Upstream(format!("invalid api_url '{}'", self.api_url)))?
            .pop_if_empty()
            .extend(["breachedaccount", email]);
        url.query_pairs_mut().append_pair("truncateResponse", "false");

        debug!(%url, "querying breach API");
        let resp = self
            .http
            .get(url)
            .header("hibp-api-key", api_key)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::BAD_REQUEST => Err(BreachError::Upstream(
                "the account does not comply with an acceptable format".to_string(),
            )),
            StatusCode::UNAUTHORIZED => Err(BreachError::Upstream(
                "the hibp-api-key header was rejected".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(BreachError::Upstream(
                "rate limit exceeded".to_string(),
            )),
            status if !status.is_success() => Err(BreachError::Upstream(format!(
                "unexpected status {}",
                status
            ))),
            _ => {
                let models: Vec<BreachModel> = resp.json().await?;
                Ok(models.into_iter().map(Breach::from).collect())
            }
        }
    }
}
