//! # Nimbus Weather
//!
//! Client for the weather REST API: current conditions, multi-day forecast
//! and location search. Requests go through any [`nimbus_net::Fetcher`]; in
//! the app that is the service worker container, so every call is answered
//! network-first with a cached fallback.

use nimbus_common::NimbusError;
use nimbus_net::NetError;
use thiserror::Error;

pub mod client;
pub mod types;

pub use client::WeatherClient;
pub use types::{
    Alert, Alerts, Astro, Condition, Current, Day, Forecast, ForecastData, ForecastDay,
    HourlyForecast, Location, LocationSearchResult, WeatherData,
};

/// Errors from the weather client.
#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("No API key configured (set WEATHER_API_KEY or api.key)")]
    MissingKey,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The API answered with a non-2xx status.
    #[error("API returned {status}: {message}")]
    Status {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),
}

impl From<WeatherError> for NimbusError {
    fn from(err: WeatherError) -> Self {
        match err {
            WeatherError::Network(e) => e.into(),
            WeatherError::MissingKey => NimbusError::config(err.to_string()),
            err => NimbusError::api_with_source("weather API request failed", err),
        }
    }
}
