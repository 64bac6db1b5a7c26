use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::area::AreaCode;
use crate::fetch::{FetchError, FetchWindow, Fetcher};

pub const DEFAULT_BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";
pub const TOKEN_ENV: &str = "ENTSOE_API_KEY";

const DAY_AHEAD_PRICES: &str = "A44";
const QUERY_TIME_FORMAT: &str = "%Y%m%d%H%M";

/// Blocking client for the transparency platform's day-ahead price endpoint.
pub struct EntsoeClient {
    client: Client,
    base_url: String,
    token: String,
}

impl EntsoeClient {
    pub fn new(token: impl Into<String>) -> Result<Self, FetchError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(FetchError::MissingToken);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        })
    }

    pub fn from_env() -> Result<Self, FetchError> {
        let token = std::env::var(TOKEN_ENV).map_err(|_| FetchError::MissingToken)?;
        Self::new(token)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Fetcher for EntsoeClient {
    fn fetch(&self, area: AreaCode, window: &FetchWindow) -> Result<Vec<u8>, FetchError> {
        let period_start = window.start.format(QUERY_TIME_FORMAT).to_string();
        let period_end = window.end.format(QUERY_TIME_FORMAT).to_string();
        debug!(%area, %period_start, %period_end, "requesting day-ahead prices");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("securityToken", self.token.as_str()),
                ("documentType", DAY_AHEAD_PRICES),
                ("in_Domain", area.eic()),
                ("out_Domain", area.eic()),
                ("periodStart", period_start.as_str()),
                ("periodEnd", period_end.as_str()),
            ])
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::Transport(err.to_string()))
    }
}
