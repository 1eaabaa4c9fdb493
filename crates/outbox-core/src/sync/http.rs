//! REST transport for the remote store.

use reqwest::{Method, StatusCode, Url};

use super::{classify_status, Outcome, Transport};
use crate::config::RemoteConfig;
use crate::error::Result;
use crate::models::{OperationKind, OperationRecord};
use crate::util::compact_text;

/// Sends operations as JSON over HTTP.
///
/// `create` posts to `{base}/v1/{entity_type}`; `update` and `delete` target
/// `{base}/v1/{entity_type}/{entity_id}`. Every request carries the operation
/// id as `Idempotency-Key`, since an interrupted send may be repeated.
#[derive(Clone)]
pub struct HttpTransport {
    remote: RemoteConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(remote: RemoteConfig) -> Result<Self> {
        Ok(Self {
            remote,
            client: reqwest::Client::builder().build()?,
        })
    }

    pub const fn remote(&self) -> &RemoteConfig {
        &self.remote
    }
}

impl Transport for HttpTransport {
    async fn send(&self, record: &OperationRecord) -> Outcome {
        let url = match request_url(&self.remote.base_url, record) {
            Ok(url) => url,
            Err(reason) => return Outcome::PermanentFailure(reason),
        };

        let mut request = self
            .client
            .request(request_method(record.kind), url)
            .header("Accept", "application/json")
            .header("Idempotency-Key", record.id.as_str());
        if let Some(token) = &self.remote.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = &record.payload {
            request = request.json(payload);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = if status.is_success() {
                    String::new()
                } else {
                    response.text().await.unwrap_or_default()
                };
                classify_response(record.kind, status, &body)
            }
            Err(error) => classify_request_error(&error),
        }
    }
}

const fn request_method(kind: OperationKind) -> Method {
    match kind {
        OperationKind::Create => Method::POST,
        OperationKind::Update => Method::PUT,
        OperationKind::Delete => Method::DELETE,
    }
}

fn request_url(base_url: &str, record: &OperationRecord) -> std::result::Result<Url, String> {
    let mut url =
        Url::parse(base_url).map_err(|error| format!("Invalid remote URL {base_url}: {error}"))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| format!("Remote URL cannot be a base: {base_url}"))?;
        segments
            .pop_if_empty()
            .push("v1")
            .push(record.entity_type.as_str());
        if record.kind != OperationKind::Create {
            segments.push(&record.entity_id);
        }
    }
    Ok(url)
}

fn classify_response(kind: OperationKind, status: StatusCode, body: &str) -> Outcome {
    // Whatever we meant to delete is already gone.
    if kind == OperationKind::Delete
        && matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE)
    {
        return Outcome::Success;
    }

    let body = compact_text(body);
    match classify_status(status.as_u16()) {
        Outcome::TransientFailure(reason) if !body.is_empty() => {
            Outcome::TransientFailure(format!("{reason}: {body}"))
        }
        Outcome::PermanentFailure(reason) if !body.is_empty() => {
            Outcome::PermanentFailure(format!("{reason}: {body}"))
        }
        outcome => outcome,
    }
}

fn classify_request_error(error: &reqwest::Error) -> Outcome {
    if error.is_builder() {
        Outcome::permanent(format!("Invalid request: {error}"))
    } else if error.is_timeout() {
        Outcome::transient("timeout")
    } else {
        Outcome::transient(compact_text(&error.to_string()))
    }
}
