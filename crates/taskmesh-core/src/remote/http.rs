//! REST client for the taskmesh API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{RemoteError, RemoteRecord, RemoteService};
use crate::error::{Error, Result};
use crate::merge::FetchScope;
use crate::models::{EntityKind, RecordId};
use crate::util::normalize_text_option;

const REQUEST_TIMEOUT_SECS: u64 = 15;
/// Longest server message carried into a record's `last_error`
const MAX_ERROR_CHARS: usize = 180;

/// `RemoteService` over HTTP:
///
/// - `POST   {base}/v1/{kind}`
/// - `PATCH  {base}/v1/{kind}/{id}`
/// - `DELETE {base}/v1/{kind}/{id}`
/// - `GET    {base}/v1/{kind}[?ref={id}]`
///
/// Records travel as flat JSON objects carrying `id` and optionally
/// `updated_at` next to the entity fields.
#[derive(Clone)]
pub struct HttpRemoteService {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteService")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpRemoteService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/v1/{}", self.base_url, kind.remote_path())
    }

    fn record_url(&self, kind: EntityKind, id: &RecordId) -> String {
        format!(
            "{}/{}",
            self.collection_url(kind),
            urlencoding::encode(id.as_str())
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| RemoteError::Transient(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(
            status.as_u16(),
            parse_api_error(status, &body),
        ))
    }

    async fn read_record(response: Response) -> std::result::Result<RemoteRecord, RemoteError> {
        let body = response
            .bytes()
            .await
            .map_err(|error| RemoteError::InvalidResponse(format!("unreadable body: {error}")))?;
        parse_record(&body)
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn create_entity(
        &self,
        kind: EntityKind,
        fields: Value,
    ) -> std::result::Result<RemoteRecord, RemoteError> {
        let request = self.client.post(self.collection_url(kind)).json(&fields);
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: &RecordId,
        deltas: Value,
    ) -> std::result::Result<RemoteRecord, RemoteError> {
        let request = self.client.patch(self.record_url(kind, id)).json(&deltas);
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn delete_entity(
        &self,
        kind: EntityKind,
        id: &RecordId,
    ) -> std::result::Result<(), RemoteError> {
        self.send(self.client.delete(self.record_url(kind, id)))
            .await?;
        Ok(())
    }

    async fn fetch_all(
        &self,
        kind: EntityKind,
        scope: &FetchScope,
    ) -> std::result::Result<Vec<RemoteRecord>, RemoteError> {
        let url = match scope {
            FetchScope::All => self.collection_url(kind),
            FetchScope::Referencing(id) => format!(
                "{}?ref={}",
                self.collection_url(kind),
                urlencoding::encode(id.as_str())
            ),
        };
        let response = self.send(self.client.get(url)).await?;
        let records = response
            .json::<Vec<WireRecord>>()
            .await
            .map_err(|error| RemoteError::Transient(format!("invalid snapshot payload: {error}")))?;
        Ok(records.into_iter().map(RemoteRecord::from).collect())
    }
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    id: RecordId,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl From<WireRecord> for RemoteRecord {
    fn from(value: WireRecord) -> Self {
        Self {
            id: value.id,
            fields: Value::Object(value.fields),
            updated_at: value.updated_at,
        }
    }
}

fn parse_record(body: &[u8]) -> std::result::Result<RemoteRecord, RemoteError> {
    serde_json::from_slice::<WireRecord>(body)
        .map(RemoteRecord::from)
        .map_err(|error| RemoteError::InvalidResponse(format!("invalid record payload: {error}")))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| payload.message.or(payload.error))
        .unwrap_or_else(|| body.to_string());
    let message: String = message.trim().chars().take(MAX_ERROR_CHARS).collect();
    if message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{message} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
