//! City weather lookup against Open-Meteo: geocode the name, then fetch
//! current conditions for the first match.

use log::{error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::WeatherSnapshot;

pub const DEFAULT_CITY: &str = "London";

const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m";

const WEATHER_CODES: [(u16, &str); 18] = [
    (0, "Clear sky"),
    (1, "Mainly clear"),
    (2, "Partly cloudy"),
    (3, "Overcast"),
    (45, "Fog"),
    (48, "Depositing rime fog"),
    (51, "Light drizzle"),
    (53, "Moderate drizzle"),
    (55, "Dense drizzle"),
    (61, "Slight rain"),
    (63, "Moderate rain"),
    (65, "Heavy rain"),
    (80, "Slight rain showers"),
    (81, "Moderate rain showers"),
    (82, "Violent rain showers"),
    (95, "Thunderstorm"),
    (96, "Thunderstorm with slight hail"),
    (99, "Thunderstorm with heavy hail"),
];

pub fn describe(code: u16) -> &'static str {
    WEATHER_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown", |(_, description)| *description)
}

pub fn icon(code: u16) -> &'static str {
    match code {
        0 => "☀️",
        1..=3 => "⛅",
        4..=48 => "🌫️",
        49..=82 => "🌧️",
        83..=99 => "⛈️",
        _ => "🌈",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Convert a Celsius reading for display.
    pub fn convert(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    pub fn temperature_label(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    /// Label only: the wind value itself is never converted.
    pub fn wind_label(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "km/h",
            TemperatureUnit::Fahrenheit => "mph",
        }
    }

    pub fn format_temperature(self, celsius: f64) -> String {
        format!("{}{}", self.convert(celsius).round(), self.temperature_label())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Place {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<Place>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentConditions {
    pub temperature_2m: f64,
    pub relative_humidity_2m: f64,
    pub apparent_temperature: f64,
    pub weather_code: u16,
    pub wind_speed_10m: f64,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

/// Unauthenticated Open-Meteo client.
#[derive(Clone)]
pub struct WeatherClient {
    http: Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherClient {
    pub fn new(http: Client, geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        WeatherClient {
            http,
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
        }
    }

    /// Resolve a free-text city name; only the first match is used.
    pub async fn geocode(&self, city: &str) -> Result<Place> {
        let response = self
            .http
            .get(&self.geocoding_url)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::server(status, "Failed to find city"));
        }
        let body: GeocodingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("geocoding response: {e}")))?;
        body.results
            .and_then(|results| results.into_iter().next())
            .ok_or(AppError::CityNotFound)
    }

    pub async fn current(&self, place: &Place) -> Result<CurrentConditions> {
        let response = self
            .http
            .get(&self.forecast_url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::server(status, "Failed to fetch weather data"));
        }
        let body: ForecastResponse = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("forecast response: {e}")))?;
        Ok(body.current)
    }

    pub async fn lookup(&self, city: &str) -> Result<WeatherSnapshot> {
        let place = self.geocode(city).await?;
        let current = self.current(&place).await?;
        Ok(WeatherSnapshot {
            name: place.name,
            temperature: current.temperature_2m,
            feels_like: current.apparent_temperature,
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
            weather_code: current.weather_code,
            description: describe(current.weather_code).to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherState {
    pub city: String,
    pub unit: TemperatureUnit,
    pub snapshot: Option<WeatherSnapshot>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for WeatherState {
    fn default() -> Self {
        WeatherState {
            city: DEFAULT_CITY.to_string(),
            unit: TemperatureUnit::default(),
            snapshot: None,
            loading: false,
            error: None,
        }
    }
}

pub struct WeatherViewModel {
    client: WeatherClient,
    state: RwLock<WeatherState>,
}

impl WeatherViewModel {
    pub fn new(client: WeatherClient) -> Self {
        WeatherViewModel {
            client,
            state: RwLock::new(WeatherState::default()),
        }
    }

    pub async fn state(&self) -> WeatherState {
        self.state.read().await.clone()
    }

    pub async fn set_city(&self, city: impl Into<String>) {
        self.state.write().await.city = city.into();
    }

    /// Switching units is display-only; nothing is refetched.
    pub async fn set_unit(&self, unit: TemperatureUnit) {
        self.state.write().await.unit = unit;
    }

    /// Look up the current city. A failure clears the previous snapshot.
    pub async fn search(&self) -> Result<WeatherSnapshot> {
        let city = {
            let mut state = self.state.write().await;
            state.loading = true;
            state.error = None;
            state.city.clone()
        };

        let result = self.client.lookup(&city).await;

        let mut state = self.state.write().await;
        state.loading = false;
        match result {
            Ok(snapshot) => {
                info!("{}: {} ({})", snapshot.name, snapshot.description, snapshot.temperature);
                state.snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                error!("Weather lookup for {} failed: {}", city, e);
                state.error = Some(e.to_string());
                state.snapshot = None;
                Err(e)
            }
        }
    }
}
