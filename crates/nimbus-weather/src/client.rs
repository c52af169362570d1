//! Weather API client.

use std::sync::Arc;

use nimbus_core::NimbusConfig;
use nimbus_net::{Fetcher, Request};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::types::{ApiErrorBody, ForecastData, LocationSearchResult, WeatherData};
use crate::WeatherError;

/// Weather API client.
#[derive(Clone)]
pub struct WeatherClient {
    fetcher: Arc<dyn Fetcher>,
    base_url: Url,
    key: String,
    forecast_days: u8,
}

impl WeatherClient {
    pub const DEFAULT_FORECAST_DAYS: u8 = 14;

    /// Create a client for the API at `base_url`, e.g.
    /// `https://api.weatherapi.com/v1`.
    pub fn new(fetcher: Arc<dyn Fetcher>, base_url: Url, key: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url,
            key: key.into(),
            forecast_days: Self::DEFAULT_FORECAST_DAYS,
        }
    }

    /// Client configured from the `api` section.
    pub fn from_config(config: &NimbusConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, WeatherError> {
        let key = config
            .api
            .key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(WeatherError::MissingKey)?;
        let base_url = config
            .api_base_url()
            .map_err(|e| WeatherError::InvalidUrl(e.to_string()))?;
        Ok(Self::new(fetcher, base_url, key).forecast_days(config.api.forecast_days))
    }

    /// Set the number of forecast days requested.
    pub fn forecast_days(mut self, days: u8) -> Self {
        self.forecast_days = days;
        self
    }

    /// Current conditions for a location query (name, postcode, `lat,lon`).
    pub async fn current(&self, location: &str) -> Result<WeatherData, WeatherError> {
        let url = self.current_url(location)?;
        self.get_json(url).await
    }

    /// Current conditions at coordinates.
    pub async fn current_at(&self, lat: f64, lon: f64) -> Result<WeatherData, WeatherError> {
        self.current(&format!("{},{}", lat, lon)).await
    }

    /// Forecast with hourly breakdown.
    pub async fn forecast(&self, location: &str) -> Result<ForecastData, WeatherError> {
        let url = self.forecast_url(location)?;
        self.get_json(url).await
    }

    /// Location autocomplete. A blank query matches nothing and sends no
    /// request.
    pub async fn search(&self, query: &str) -> Result<Vec<LocationSearchResult>, WeatherError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.search_url(query)?;
        self.get_json(url).await
    }

    pub fn current_url(&self, location: &str) -> Result<Url, WeatherError> {
        self.endpoint("current.json", &[("q", location), ("aqi", "no")])
    }

    pub fn forecast_url(&self, location: &str) -> Result<Url, WeatherError> {
        let days = self.forecast_days.to_string();
        self.endpoint(
            "forecast.json",
            &[("q", location), ("days", &days), ("aqi", "no"), ("alerts", "no")],
        )
    }

    pub fn search_url(&self, query: &str) -> Result<Url, WeatherError> {
        self.endpoint("search.json", &[("q", query)])
    }

    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<Url, WeatherError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| WeatherError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push(name);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.key);
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, WeatherError> {
        debug!(endpoint = url.path(), "Weather API request");
        let response = self.fetcher.fetch(&Request::get(url)).await?;

        if !response.ok() {
            let status = response.status;
            let body = response.bytes();
            let (code, message) = match serde_json::from_slice::<ApiErrorBody>(&body) {
                Ok(parsed) => (parsed.error.code, parsed.error.message),
                Err(_) => (None, String::from_utf8_lossy(&body).into_owned()),
            };
            warn!(status, ?code, %message, "Weather API error");
            return Err(WeatherError::Status {
                status,
                code,
                message,
            });
        }

        let body = response.bytes();
        serde_json::from_slice(&body).map_err(|e| WeatherError::Decode(e.to_string()))
    }
}
