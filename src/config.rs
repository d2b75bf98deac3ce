use std::env;
use std::path::PathBuf;

use url::Url;

use crate::error::{AppError, Result};

const DEFAULT_API_URL: &str = "https://xydxsg2ope.execute-api.us-east-1.amazonaws.com/default";
const DEFAULT_CHAT_URL: &str = "wss://ws.execute-api.us-east-1.amazonaws.com/production";
const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Endpoints and on-disk locations for the three demo apps.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST base for `/auth/*` and `/todos`.
    pub api_url: String,
    pub chat_url: String,
    pub geocoding_url: String,
    pub weather_url: String,
    /// Directory backing the persisted session keys.
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            chat_url: DEFAULT_CHAT_URL.to_string(),
            geocoding_url: DEFAULT_GEOCODING_URL.to_string(),
            weather_url: DEFAULT_WEATHER_URL.to_string(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    /// Build a config from `TODO_API_URL`, `CHAT_WS_URL`, `GEOCODING_API_URL`,
    /// `WEATHER_API_URL` and `PORTFOLIO_STATE_DIR`, falling back to the
    /// public defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let config = Config {
            api_url: env::var("TODO_API_URL").unwrap_or(defaults.api_url),
            chat_url: env::var("CHAT_WS_URL").unwrap_or(defaults.chat_url),
            geocoding_url: env::var("GEOCODING_API_URL").unwrap_or(defaults.geocoding_url),
            weather_url: env::var("WEATHER_API_URL").unwrap_or(defaults.weather_url),
            state_dir: env::var_os("PORTFOLIO_STATE_DIR")
                .map_or(defaults.state_dir, PathBuf::from),
        };
        config.normalized()
    }

    /// Strip trailing slashes and check every endpoint has the right scheme.
    pub fn normalized(self) -> Result<Self> {
        Ok(Config {
            api_url: normalize_url(&self.api_url, &["http", "https"])?,
            chat_url: normalize_url(&self.chat_url, &["ws", "wss"])?,
            geocoding_url: normalize_url(&self.geocoding_url, &["http", "https"])?,
            weather_url: normalize_url(&self.weather_url, &["http", "https"])?,
            state_dir: self.state_dir,
        })
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portfolio")
}

pub(crate) fn normalize_url(raw: &str, schemes: &[&str]) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AppError::InvalidUrl("URL cannot be empty".to_string()));
    }
    let parsed = Url::parse(trimmed).map_err(|e| AppError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(AppError::InvalidUrl(format!(
            "{trimmed}: scheme must be one of {}",
            schemes.join(", ")
        )));
    }
    Ok(trimmed.to_string())
}
