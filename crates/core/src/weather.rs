//! Daily forecast lookup through the Open-Meteo geocoding and forecast APIs.

use crate::tool::{Tool, ToolError, required_str};
use async_trait::async_trait;
use chrono::NaiveDate;
use gemini_realtime::{FunctionDeclaration, ToolDeclaration};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FUNCTION_NAME: &str = "get_weather_on_date";
pub const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Upper bound for one lookup, geocoding and forecast together.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Debug)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Deserialize, Debug, Clone)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
    admin1: Option<String>,
}

impl Place {
    fn display_name(&self) -> String {
        [Some(self.name.as_str()), self.admin1.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Deserialize, Debug)]
struct ForecastResponse {
    daily: Daily,
    #[serde(default)]
    daily_units: Value,
}

#[derive(Deserialize, Debug)]
struct Daily {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    weathercode: Vec<Option<u32>>,
}

/// WMO weather interpretation codes.
pub fn describe_weather_code(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 => "Snow fall",
        77 => "Snow grains",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}

pub struct WeatherTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
    timeout: Duration,
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client; using defaults.");
            reqwest::Client::new()
        })
}

impl WeatherTool {
    pub fn new() -> Self {
        Self::with_urls(GEOCODING_URL, FORECAST_URL)
    }

    pub fn with_urls(geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self.timeout = timeout;
        self
    }

    async fn lookup(&self, location: &str, date: NaiveDate) -> Result<Value, ToolError> {
        let place = self.geocode(location).await?;
        debug!(place = %place.display_name(), "Resolved location.");
        let forecast = self.forecast(&place, date).await?;

        let day = date.format("%Y-%m-%d").to_string();
        let index = forecast
            .daily
            .time
            .iter()
            .position(|t| *t == day)
            .ok_or_else(|| ToolError::Execution(format!("No forecast available for {day}")))?;
        let at = |series: &[Option<f64>]| series.get(index).copied().flatten();
        let code = forecast.daily.weathercode.get(index).copied().flatten();

        Ok(json!({
            "location": place.display_name(),
            "latitude": place.latitude,
            "longitude": place.longitude,
            "date": day,
            "temperature_max": at(&forecast.daily.temperature_2m_max),
            "temperature_min": at(&forecast.daily.temperature_2m_min),
            "precipitation_sum": at(&forecast.daily.precipitation_sum),
            "weather_code": code,
            "description": code.map(describe_weather_code),
            "units": forecast.daily_units,
        }))
    }

    async fn geocode(&self, location: &str) -> Result<Place, ToolError> {
        let response: GeocodingResponse = self
            .client
            .get(&self.geocoding_url)
            .query(&[
                ("name", location),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ToolError::Execution(format!("Geocoding request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("Invalid geocoding response: {e}")))?;

        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Execution(format!("Location not found: {location}")))
    }

    async fn forecast(&self, place: &Place, date: NaiveDate) -> Result<ForecastResponse, ToolError> {
        let day = date.format("%Y-%m-%d").to_string();
        self.client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                (
                    "daily",
                    "temperature_2m_max,temperature_2m_min,precipitation_sum,weathercode"
                        .to_string(),
                ),
                ("timezone", "auto".to_string()),
                ("start_date", day.clone()),
                ("end_date", day),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ToolError::Execution(format!("Forecast request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("Invalid forecast response: {e}")))
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::FunctionDeclarations(vec![FunctionDeclaration {
            name: FUNCTION_NAME.to_string(),
            description: "Get the weather forecast for a location on a specific date".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city or place name, e.g. 'Berlin' or 'Paris, France'"
                    },
                    "date": {
                        "type": "string",
                        "description": "The date in YYYY-MM-DD format"
                    }
                },
                "required": ["location", "date"]
            }),
        }])
    }

    fn aliases(&self) -> Vec<String> {
        vec![FUNCTION_NAME.to_string()]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let location = required_str(&args, "location")?;
        let raw_date = required_str(&args, "date")?;
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|_| {
            ToolError::InvalidParameter(format!("'date' must be YYYY-MM-DD, got '{raw_date}'"))
        })?;
        info!(%location, %date, "Executing weather tool.");

        tokio::time::timeout(self.timeout, self.lookup(location, date))
            .await
            .map_err(|_| {
                ToolError::Execution(format!("Weather lookup timed out after {:?}", self.timeout))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_for(server: &MockServer) -> WeatherTool {
        WeatherTool::with_urls(
            format!("{}/v1/search", server.uri()),
            format!("{}/v1/forecast", server.uri()),
        )
    }

    async fn mount_berlin(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("name", "Berlin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "name": "Berlin", "latitude": 52.52, "longitude": 13.41,
                    "country": "Germany", "admin1": "Land Berlin"
                }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_forecast_for_date() {
        let server = MockServer::start().await;
        mount_berlin(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("start_date", "2025-03-01"))
            .and(query_param("end_date", "2025-03-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "daily_units": { "temperature_2m_max": "°C" },
                "daily": {
                    "time": ["2025-03-01"],
                    "temperature_2m_max": [9.5],
                    "temperature_2m_min": [1.2],
                    "precipitation_sum": [0.0],
                    "weathercode": [3]
                }
            })))
            .mount(&server)
            .await;

        let output = tool_for(&server)
            .execute(json!({ "location": "Berlin", "date": "2025-03-01" }))
            .await
            .unwrap();

        assert_eq!(output["location"], "Berlin, Land Berlin, Germany");
        assert_eq!(output["temperature_max"], json!(9.5));
        assert_eq!(output["temperature_min"], json!(1.2));
        assert_eq!(output["weather_code"], json!(3));
        assert_eq!(output["description"], "Overcast");
        assert_eq!(output["units"]["temperature_2m_max"], "°C");
    }

    #[tokio::test]
    async fn test_unknown_location_is_execution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(json!({ "location": "Nowhere", "date": "2025-03-01" }))
            .await;
        assert_eq!(
            result,
            Err(ToolError::Execution("Location not found: Nowhere".into()))
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_execution_error() {
        let server = MockServer::start().await;
        mount_berlin(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(json!({ "location": "Berlin", "date": "2025-03-01" }))
            .await;
        assert!(matches!(result, Err(ToolError::Execution(_))));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_rejected_before_any_request() {
        let tool = WeatherTool::with_urls("http://127.0.0.1:9/none", "http://127.0.0.1:9/none");
        assert!(matches!(
            tool.execute(json!({ "date": "2025-03-01" })).await,
            Err(ToolError::InvalidParameter(_))
        ));
        assert!(matches!(
            tool.execute(json!({ "location": "Berlin", "date": "03/01/2025" })).await,
            Err(ToolError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let result = tool_for(&server)
            .with_timeout(Duration::from_millis(200))
            .execute(json!({ "location": "Berlin", "date": "2025-03-01" }))
            .await;

        assert!(matches!(result, Err(ToolError::Execution(_))), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_weather_codes() {
        assert_eq!(describe_weather_code(0), "Clear sky");
        assert_eq!(describe_weather_code(81), "Rain showers");
        assert_eq!(describe_weather_code(1234), "Unknown");
    }
}
