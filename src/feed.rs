use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::FeedConfig;
use crate::models::RawAlertEvent;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Alert feed unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Alert feed returned status {0}")]
    Status(u16),

    #[error("Alert feed body malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of alert batches.
#[async_trait]
pub trait AlertFeed: Send + Sync {
    /// Latest batch; empty when nothing is active.
    async fn fetch_latest(&self) -> Result<Vec<RawAlertEvent>, FeedError>;
}

pub struct HttpAlertFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpAlertFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// The feed answers with an empty body (or `null`/`[]`) when idle.
pub fn parse_batch(body: &str) -> Result<Vec<RawAlertEvent>, FeedError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }
    let batch: Option<Vec<RawAlertEvent>> = serde_json::from_str(trimmed)?;
    Ok(batch.unwrap_or_default())
}

#[async_trait]
impl AlertFeed for HttpAlertFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawAlertEvent>, FeedError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let batch = parse_batch(&body)?;
        if !batch.is_empty() {
            info!("Got {} alert(s): {}", batch.len(), body.trim());
        }
        Ok(batch)
    }
}
