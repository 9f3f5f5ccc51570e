//! Lookup backends. The ladder is written against [`GeocodeProvider`], not a
//! concrete provider's request/response shape; OpenCage is the precision
//! provider, Nominatim the best-effort secondary.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "tw-geocoder/0.1.0";

// min lon, min lat, max lon, max lat (WGS84) — keeps providers from
// wandering off to identically-named roads abroad.
const OPENCAGE_BOUNDS: &str = "119.5,21.5,122.5,25.5";
// Nominatim wants left,top,right,bottom.
const NOMINATIM_VIEWBOX: &str = "119.5,25.5,122.5,21.5";

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHit {
    pub lat: f64,
    pub lng: f64,
    pub confidence: Option<f64>,
    pub formatted: Option<String>,
    pub components: BTreeMap<String, String>,
}

/// One lookup backend: a query string plus optional proximity bias in, at
/// most one best coordinate out. `Ok(None)` is a definitive per-query miss;
/// transient failures surface as errors so the caller can retry.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        query: &str,
        bias: Option<(f64, f64)>,
    ) -> AppResult<Option<ProviderHit>>;
}

/// Maps a provider response status onto the retry taxonomy: 429/5xx are
/// transient, any other 4xx is a definitive miss for this query.
fn classify_status(provider: &str, query: &str, status: reqwest::StatusCode) -> AppResult<bool> {
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(AppError::ProviderStatus(status.as_u16()));
    }
    if status.is_client_error() {
        warn!(provider, query, status = status.as_u16(), "query rejected, skipping candidate");
        return Ok(false);
    }
    Ok(true)
}

fn string_components(raw: serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            _ => None,
        })
        .collect()
}

pub struct OpenCageClient {
    http: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
}

impl OpenCageClient {
    pub fn new(api_key: SecretString, endpoint: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let api_key = config.opencage_api_key.clone().ok_or_else(|| {
            AppError::Config("OPENCAGE_API_KEY is required for the primary provider".into())
        })?;
        Self::new(api_key, config.opencage_endpoint.clone())
    }
}

#[derive(Deserialize)]
struct OpenCageResponse {
    #[serde(default)]
    results: Vec<OpenCageResult>,
}

#[derive(Deserialize)]
struct OpenCageResult {
    geometry: OpenCageGeometry,
    confidence: Option<f64>,
    formatted: Option<String>,
    #[serde(default)]
    components: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct OpenCageGeometry {
    lat: f64,
    lng: f64,
}

#[async_trait]
impl GeocodeProvider for OpenCageClient {
    fn name(&self) -> &'static str {
        "opencage"
    }

    async fn resolve(
        &self,
        query: &str,
        bias: Option<(f64, f64)>,
    ) -> AppResult<Option<ProviderHit>> {
        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.expose_secret().to_string()),
            ("q", query.to_string()),
            ("countrycode", "tw".to_string()),
            ("language", "zh-TW".to_string()),
            ("limit", "1".to_string()),
            ("no_annotations", "1".to_string()),
            ("bounds", OPENCAGE_BOUNDS.to_string()),
        ];
        if let Some((lat, lng)) = bias {
            params.push(("proximity", format!("{lat},{lng}")));
        }

        let response = self.http.get(&self.endpoint).query(&params).send().await?;
        if !classify_status(self.name(), query, response.status())? {
            return Ok(None);
        }

        let parsed: OpenCageResponse = response.json().await?;
        let Some(best) = parsed.results.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(ProviderHit {
            lat: best.geometry.lat,
            lng: best.geometry.lng,
            confidence: best.confidence,
            formatted: best.formatted,
            components: string_components(best.components),
        }))
    }
}

pub struct NominatimClient {
    http: reqwest::Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(endpoint: impl Into<String>, user_agent: &str) -> AppResult<Self> {
        // Nominatim's usage policy requires an identifying User-Agent.
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(
            config.nominatim_endpoint.clone(),
            &config.nominatim_user_agent,
        )
    }
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: Option<String>,
    #[serde(default)]
    address: serde_json::Map<String, Value>,
}

#[async_trait]
impl GeocodeProvider for NominatimClient {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn resolve(
        &self,
        query: &str,
        _bias: Option<(f64, f64)>,
    ) -> AppResult<Option<ProviderHit>> {
        let params: Vec<(&str, String)> = vec![
            ("format", "jsonv2".to_string()),
            ("q", query.to_string()),
            ("limit", "1".to_string()),
            ("addressdetails", "1".to_string()),
            ("countrycodes", "tw".to_string()),
            ("bounded", "1".to_string()),
            ("viewbox", NOMINATIM_VIEWBOX.to_string()),
        ];

        let response = self.http.get(&self.endpoint).query(&params).send().await?;
        if !classify_status(self.name(), query, response.status())? {
            return Ok(None);
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        let Some(best) = places.into_iter().next() else {
            return Ok(None);
        };

        let (Ok(lat), Ok(lng)) = (best.lat.parse::<f64>(), best.lon.parse::<f64>()) else {
            warn!(query, lat = %best.lat, lon = %best.lon, "unparseable coordinates in response");
            return Ok(None);
        };

        Ok(Some(ProviderHit {
            lat,
            lng,
            confidence: None,
            formatted: best.display_name,
            components: string_components(best.address),
        }))
    }
}
