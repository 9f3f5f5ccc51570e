use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_OPENCAGE_ENDPOINT: &str = "https://api.opencagedata.com/geocode/v1/json";
const DEFAULT_NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
const DEFAULT_NOMINATIM_USER_AGENT: &str = "tw-geocoder/0.1 (+https://example.com)";
const DEFAULT_MIN_INTERVAL_MS: u64 = 1_200;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_500;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub opencage_api_key: Option<SecretString>,
    pub opencage_endpoint: String,
    pub nominatim_endpoint: String,
    pub nominatim_user_agent: String,
    pub use_nominatim: bool,
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub input_path: String,
    pub output_path: String,
    pub cache_path: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub has_opencage_key: bool,
    pub opencage_endpoint: String,
    pub nominatim_endpoint: String,
    pub use_nominatim: bool,
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub input_path: String,
    pub output_path: String,
    pub cache_path: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            opencage_api_key: env::var("OPENCAGE_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            opencage_endpoint: env::var("OPENCAGE_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_OPENCAGE_ENDPOINT.to_string()),
            nominatim_endpoint: env::var("NOMINATIM_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_NOMINATIM_ENDPOINT.to_string()),
            nominatim_user_agent: env::var("NOMINATIM_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_NOMINATIM_USER_AGENT.to_string()),
            use_nominatim: parse_bool("GEOCODE_NOMINATIM", false),
            min_interval_ms: parse_u64("GEOCODE_MIN_INTERVAL_MS", DEFAULT_MIN_INTERVAL_MS),
            max_retries: parse_u32("GEOCODE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_base_delay_ms: parse_u64(
                "GEOCODE_RETRY_BASE_DELAY_MS",
                DEFAULT_RETRY_BASE_DELAY_MS,
            ),
            input_path: env::var("GEOCODE_INPUT").unwrap_or_else(|_| "clinics.json".to_string()),
            output_path: env::var("GEOCODE_OUTPUT")
                .unwrap_or_else(|_| "clinics_geocoded.json".to_string()),
            cache_path: env::var("GEOCODE_CACHE")
                .unwrap_or_else(|_| "geocode-cache.db".to_string()),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            has_opencage_key: self.opencage_api_key.is_some(),
            opencage_endpoint: self.opencage_endpoint.clone(),
            nominatim_endpoint: self.nominatim_endpoint.clone(),
            use_nominatim: self.use_nominatim,
            min_interval_ms: self.min_interval_ms,
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            input_path: self.input_path.clone(),
            output_path: self.output_path.clone(),
            cache_path: self.cache_path.clone(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
