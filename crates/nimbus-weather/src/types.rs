//! Weather API payloads.

use serde::{Deserialize, Serialize};

/// Weather condition summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub text: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub region: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub localtime: String,
}

/// Current conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Current {
    pub temp_c: f64,
    pub temp_f: f64,
    pub condition: Condition,
    pub humidity: f64,
    pub wind_kph: f64,
    pub feelslike_c: f64,
    pub pressure_mb: f64,
    pub precip_mm: f64,
    pub uv: f64,
    /// Not sent by every endpoint.
    #[serde(default)]
    pub sunrise: Option<String>,
    #[serde(default)]
    pub sunset: Option<String>,
    pub last_updated: String,
}

/// `current.json` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherData {
    pub location: Location,
    pub current: Current,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: String,
    pub temp_c: f64,
    pub condition: Condition,
}

/// Daily aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Day {
    pub maxtemp_c: f64,
    pub mintemp_c: f64,
    pub avgtemp_c: f64,
    pub maxwind_kph: f64,
    pub totalprecip_mm: f64,
    pub avghumidity: f64,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Astro {
    pub sunrise: String,
    pub sunset: String,
    pub moon_phase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub date_epoch: i64,
    pub day: Day,
    pub astro: Astro,
    #[serde(default)]
    pub hour: Vec<HourlyForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(rename = "forecastday")]
    pub forecast_day: Vec<ForecastDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub effective: String,
    #[serde(default)]
    pub expires: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Alerts {
    #[serde(default)]
    pub alert: Vec<Alert>,
}

/// `forecast.json` response: current conditions plus days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastData {
    #[serde(flatten)]
    pub weather: WeatherData,
    pub forecast: Forecast,
    #[serde(default)]
    pub alerts: Option<Alerts>,
}

/// One `search.json` match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSearchResult {
    pub id: i64,
    pub name: String,
    pub region: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub url: String,
}

/// Error body the API sends with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const CURRENT: &str = r#"{
        "location": {
            "name": "Oslo", "region": "Oslo", "country": "Norway",
            "lat": 59.91, "lon": 10.75, "localtime": "2024-01-15 12:00"
        },
        "current": {
            "last_updated": "2024-01-15 11:45",
            "temp_c": -3.0, "temp_f": 26.6,
            "condition": {"text": "Light snow", "icon": "//cdn.weatherapi.com/weather/64x64/day/326.png"},
            "wind_kph": 11.2, "pressure_mb": 1012.0, "precip_mm": 0.3,
            "humidity": 86, "feelslike_c": -7.4, "uv": 1.0, "vis_km": 6.0
        }
    }"#;

    pub const FORECAST: &str = r#"{
        "location": {
            "name": "Oslo", "region": "Oslo", "country": "Norway",
            "lat": 59.91, "lon": 10.75, "localtime": "2024-01-15 12:00"
        },
        "current": {
            "last_updated": "2024-01-15 11:45",
            "temp_c": -3.0, "temp_f": 26.6,
            "condition": {"text": "Light snow", "icon": "//cdn/326.png"},
            "wind_kph": 11.2, "pressure_mb": 1012.0, "precip_mm": 0.3,
            "humidity": 86, "feelslike_c": -7.4, "uv": 1.0
        },
        "forecast": {
            "forecastday": [{
                "date": "2024-01-15", "date_epoch": 1705276800,
                "day": {
                    "maxtemp_c": -1.2, "mintemp_c": -6.3, "avgtemp_c": -3.9,
                    "maxwind_kph": 14.0, "totalprecip_mm": 2.1, "avghumidity": 88,
                    "condition": {"text": "Snow", "icon": "//cdn/338.png"}
                },
                "astro": {"sunrise": "09:07 AM", "sunset": "03:38 PM", "moon_phase": "Waxing Crescent"},
                "hour": [
                    {"time": "2024-01-15 00:00", "temp_c": -5.1, "condition": {"text": "Cloudy", "icon": "//cdn/119.png"}}
                ]
            }]
        }
    }"#;
}
