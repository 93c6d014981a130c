use std::env;
use std::time::Duration;

use url::Url;
use warden_core::{AppError, AppResult};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Connection settings for the authorization service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationClientConfig {
    /// Base URL of the API, e.g. `http://127.0.0.1:8080`.
    pub api_url: Url,
    /// Store holding the relationship tuples.
    pub store_id: String,
    /// Model pinned for writes and checks; the latest model when unset.
    pub authorization_model_id: Option<String>,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl AuthorizationClientConfig {
    /// Loads settings from `FGA_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads settings through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &str| {
            optional(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
        };

        let raw_url = required("FGA_API_URL")?;
        let api_url = Url::parse(raw_url.as_str()).map_err(|error| {
            AppError::Validation(format!("invalid FGA_API_URL value '{raw_url}': {error}"))
        })?;
        let store_id = required("FGA_STORE_ID")?;

        let request_timeout_ms = match optional("FGA_REQUEST_TIMEOUT_MS") {
            Some(value) => value.parse::<u64>().map_err(|error| {
                AppError::Validation(format!(
                    "invalid FGA_REQUEST_TIMEOUT_MS value '{value}': {error}"
                ))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_MS,
        };
        if request_timeout_ms == 0 {
            return Err(AppError::Validation(
                "FGA_REQUEST_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            api_url,
            store_id,
            authorization_model_id: optional("FGA_AUTHORIZATION_MODEL_ID"),
            api_token: optional("FGA_API_TOKEN"),
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }

    /// Returns `{api_url}/stores/{store_id}/{action}`.
    pub(crate) fn endpoint(&self, action: &str) -> AppResult<Url> {
        let mut endpoint = self.api_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| {
                AppError::Validation(format!(
                    "FGA_API_URL '{}' cannot be used as a base URL",
                    self.api_url
                ))
            })?
            .pop_if_empty()
            .extend(["stores", self.store_id.as_str(), action]);
        Ok(endpoint)
    }
}
