use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GeoConfig;
use crate::models::Coordinates;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Geocoder request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Geocoder response malformed: {0}")]
    Malformed(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<GeoError>,
    },
}

/// Unreliable place-name lookup.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the service knows nothing about `place`.
    async fn geocode(&self, place: &str) -> Result<Option<Coordinates>, GeoError>;
}

/// Geocoder for Photon-compatible endpoints (`?q=<place>&limit=1`, GeoJSON out).
pub struct PhotonGeocoder {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct PhotonResponse {
    #[serde(default)]
    features: Vec<PhotonFeature>,
}

#[derive(Debug, Deserialize)]
struct PhotonFeature {
    geometry: PhotonGeometry,
}

#[derive(Debug, Deserialize)]
struct PhotonGeometry {
    /// GeoJSON order: `[lon, lat]`.
    coordinates: Vec<f64>,
}

impl PhotonGeocoder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("red-alerts-listener/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn first_coordinates(response: PhotonResponse) -> Result<Option<Coordinates>, GeoError> {
    let Some(feature) = response.features.into_iter().next() else {
        return Ok(None);
    };
    match feature.geometry.coordinates.as_slice() {
        [lon, lat, ..] => Ok(Some(Coordinates {
            lat: *lat,
            lon: *lon,
        })),
        other => Err(GeoError::Malformed(format!(
            "expected [lon, lat], got {:?}",
            other
        ))),
    }
}

#[async_trait]
impl Geocoder for PhotonGeocoder {
    async fn geocode(&self, place: &str) -> Result<Option<Coordinates>, GeoError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("q", place), ("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }

        let body: PhotonResponse = response
            .json()
            .await
            .map_err(|e| GeoError::Malformed(e.to_string()))?;
        first_coordinates(body)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            jitter: true,
        }
    }
}

impl From<&GeoConfig> for RetryPolicy {
    fn from(config: &GeoConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if self.jitter {
            delay + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..1.0))
        } else {
            delay
        }
    }

    /// Runs `op` up to `max_retries` times, sleeping between failed attempts.
    /// The last error is returned once attempts are used up.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GeoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GeoError>>,
    {
        let attempts = self.max_retries.max(1);
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    retry += 1;
                    if retry >= attempts {
                        return Err(GeoError::Exhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.delay_for(retry);
                    debug!(
                        "{}: attempt {}/{} failed: {}. Retrying in {:.2}s",
                        label,
                        retry,
                        attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Resolves place names to coordinates through a [`Geocoder`] with retries.
pub struct GeoLocator {
    geocoder: Arc<dyn Geocoder>,
    policy: RetryPolicy,
}

impl GeoLocator {
    pub fn new(geocoder: Arc<dyn Geocoder>, policy: RetryPolicy) -> Self {
        Self { geocoder, policy }
    }

    pub async fn resolve(&self, place: &str) -> Result<Option<Coordinates>, GeoError> {
        let result = self
            .policy
            .retry(place, || self.geocoder.geocode(place))
            .await;
        if let Err(e) = &result {
            warn!("Could not geocode {}: {}", place, e);
        }
        result
    }
}
