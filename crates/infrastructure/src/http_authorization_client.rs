use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use warden_application::AuthorizationClient;
use warden_core::{AppError, AppResult};
use warden_domain::RelationshipTuple;

mod config;

pub use config::AuthorizationClientConfig;

/// Tuples per read page and per write request accepted by the service.
const MAX_TUPLES_PER_REQUEST: usize = 100;

/// Authorization client for an OpenFGA-compatible HTTP API.
#[derive(Clone)]
pub struct HttpAuthorizationClient {
    http_client: reqwest::Client,
    config: AuthorizationClientConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TupleKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation: Option<String>,
    object: String,
}

impl From<&RelationshipTuple> for TupleKey {
    fn from(tuple: &RelationshipTuple) -> Self {
        Self {
            user: Some(tuple.subject().to_owned()),
            relation: Some(tuple.relation().to_owned()),
            object: tuple.object().to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TupleKeys {
    tuple_keys: Vec<TupleKey>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    writes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ReadRequest {
    tuple_key: TupleKey,
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    tuples: Vec<StoredTuple>,
    #[serde(default)]
    continuation_token: String,
}

#[derive(Debug, Deserialize)]
struct StoredTuple {
    key: TupleKey,
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    tuple_key: TupleKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    allowed: bool,
}

impl HttpAuthorizationClient {
    /// Creates a client with the configured request timeout.
    pub fn new(config: AuthorizationClientConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build authorization HTTP client: {error}"))
            })?;

        Ok(Self {
            http_client,
            config,
        })
    }

    async fn post<B, R>(&self, action: &str, body: &B) -> AppResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let endpoint: Url = self.config.endpoint(action)?;
        let mut request = self.http_client.post(endpoint).json(body);
        if let Some(token) = &self.config.api_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|error| {
            AppError::Internal(format!("failed to call authorization {action} endpoint: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(AppError::Internal(format!(
                "authorization {action} endpoint returned status {}: {body}",
                status.as_u16()
            )));
        }

        response.json::<R>().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to parse authorization {action} response body: {error}"
            ))
        })
    }

    fn write_request(&self, writes: Vec<TupleKey>, deletes: Vec<TupleKey>) -> WriteRequest<'_> {
        WriteRequest {
            writes: (!writes.is_empty()).then_some(TupleKeys { tuple_keys: writes }),
            deletes: (!deletes.is_empty()).then_some(TupleKeys {
                tuple_keys: deletes,
            }),
            authorization_model_id: self.config.authorization_model_id.as_deref(),
        }
    }

    async fn read_object_tuples(&self, object: &str) -> AppResult<Vec<TupleKey>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let page: ReadResponse = self
                .post(
                    "read",
                    &ReadRequest {
                        tuple_key: TupleKey {
                            user: None,
                            relation: None,
                            object: object.to_owned(),
                        },
                        page_size: MAX_TUPLES_PER_REQUEST,
                        continuation_token: continuation_token.take(),
                    },
                )
                .await?;

            keys.extend(page.tuples.into_iter().map(|tuple| tuple.key));
            if page.continuation_token.is_empty() {
                return Ok(keys);
            }
            continuation_token = Some(page.continuation_token);
        }
    }
}

#[async_trait]
impl AuthorizationClient for HttpAuthorizationClient {
    async fn write_tuples(&self, tuples: &[RelationshipTuple]) -> AppResult<()> {
        if tuples.is_empty() {
            return Ok(());
        }
        // One request is one transaction on the service side.
        if tuples.len() > MAX_TUPLES_PER_REQUEST {
            return Err(AppError::Validation(format!(
                "cannot write {} relationship tuples atomically; the limit is {MAX_TUPLES_PER_REQUEST}",
                tuples.len()
            )));
        }

        let writes = tuples.iter().map(TupleKey::from).collect();
        let _: serde_json::Value = self
            .post("write", &self.write_request(writes, Vec::new()))
            .await?;
        Ok(())
    }

    async fn delete_all_object_relations(&self, object: &str) -> AppResult<()> {
        let keys = self.read_object_tuples(object).await?;
        for chunk in keys.chunks(MAX_TUPLES_PER_REQUEST) {
            let _: serde_json::Value = self
                .post("write", &self.write_request(Vec::new(), chunk.to_vec()))
                .await?;
        }

        tracing::debug!(object, removed = keys.len(), "relationship tuples removed");
        Ok(())
    }

    async fn check(&self, subject: &str, relation: &str, object: &str) -> AppResult<bool> {
        let response: CheckResponse = self
            .post(
                "check",
                &CheckRequest {
                    tuple_key: TupleKey {
                        user: Some(subject.to_owned()),
                        relation: Some(relation.to_owned()),
                        object: object.to_owned(),
                    },
                    authorization_model_id: self.config.authorization_model_id.as_deref(),
                },
            )
            .await?;
        Ok(response.allowed)
    }
}
