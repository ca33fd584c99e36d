//! HTTP access to the dashboard's Docker proxy.
//!
//! Every call resolves an [`Endpoint`] to a URL under `<api base>/d/<host>`,
//! sends it, and turns the outcome into actions: a success action on 2xx,
//! alerts (and a logout on 401) otherwise. Stream calls additionally feed the
//! response body through the incremental parser and dispatch one action per
//! matched node.

use std::sync::Arc;

use async_trait::async_trait;
use flux::Dispatcher;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header::CONTENT_TYPE, Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::AlertRequest,
    error::{ApiErrorBody, INVALID_CREDENTIALS_MESSAGE},
    protocol::{Action, DockerPayload, StreamClosedPayload, StreamEvent, StreamOutcome},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    alerts::AlertSurface,
    endpoints::{Endpoint, EndpointDescriptor},
    error::GatewayError,
    pattern::parse_all,
    stream::{cancelled, consume, StreamHandle},
};

/// Parameters of one gateway call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub host: String,
    pub id: Option<String>,
    pub query: Vec<(String, String)>,
    pub data: Option<Value>,
    pub patterns: Vec<String>,
}

impl Request {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }
}

/// Everything but unreserved characters, so a value stays one path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Serialize)]
struct PayloadEnvelope<'a> {
    #[serde(rename = "Payload")]
    payload: &'a Value,
}

/// The seam views talk to. [`Gateway`] is the HTTP implementation.
#[async_trait]
pub trait DockerClient: Send + Sync {
    async fn request(
        &self,
        endpoint: Endpoint,
        request: &Request,
    ) -> Result<DockerPayload, GatewayError>;

    async fn stream(
        &self,
        endpoint: Endpoint,
        request: Request,
    ) -> Result<StreamHandle, GatewayError>;
}

#[derive(Clone)]
pub struct Gateway {
    http: Client,
    api_base: Url,
    dispatcher: Arc<Dispatcher<Action>>,
    alerts: Arc<dyn AlertSurface>,
}

impl Gateway {
    pub fn new(
        api_base: &str,
        dispatcher: Arc<Dispatcher<Action>>,
        alerts: Arc<dyn AlertSurface>,
    ) -> Result<Self, GatewayError> {
        Self::with_client(Client::new(), api_base, dispatcher, alerts)
    }

    pub fn with_client(
        http: Client,
        api_base: &str,
        dispatcher: Arc<Dispatcher<Action>>,
        alerts: Arc<dyn AlertSurface>,
    ) -> Result<Self, GatewayError> {
        let parsed = Url::parse(api_base).map_err(|err| GatewayError::ApiBase {
            url: api_base.to_string(),
            reason: err.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(GatewayError::ApiBase {
                url: api_base.to_string(),
                reason: "url cannot carry a path".to_string(),
            });
        }
        Ok(Self {
            http,
            api_base: parsed,
            dispatcher,
            alerts,
        })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// `<api base>/d/<host><path>`. The host is encoded as a single path
    /// segment; `path` is appended as given.
    pub fn url_for(&self, host: &str, path: &str) -> Result<Url, GatewayError> {
        let host = encode_segment("host", host)?;
        let mut url = self.api_base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| GatewayError::ApiBase {
                url: self.api_base.to_string(),
                reason: "url cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .push("d");
        let full_path = format!("{}/{host}{path}", url.path());
        url.set_path(&full_path);
        Ok(url)
    }

    fn endpoint_url(
        &self,
        endpoint: Endpoint,
        descriptor: &EndpointDescriptor,
        request: &Request,
    ) -> Result<Url, GatewayError> {
        let resolved = request
            .id
            .as_deref()
            .map(|id| encode_segment("id", id))
            .transpose()
            .and_then(|id| self.url_for(&request.host, &descriptor.path(id.as_deref())));
        resolved.map_err(|err| {
            error!(%endpoint, error = %err, "gateway: invalid request");
            err
        })
    }

    pub async fn request(
        &self,
        endpoint: Endpoint,
        request: &Request,
    ) -> Result<DockerPayload, GatewayError> {
        let descriptor = endpoint.descriptor();
        let url = self.endpoint_url(endpoint, &descriptor, request)?;
        debug!(%endpoint, %url, "gateway: sending request");

        let mut builder = self
            .http
            .request(descriptor.method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .query(&request.query);
        if let Some(data) = &request.data {
            builder = builder.json(&PayloadEnvelope { payload: data });
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return Err(self.transport_failed(endpoint, err)),
        };
        let response = self.check_status(endpoint, response).await?;
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return Err(self.transport_failed(endpoint, err)),
        };

        let payload = DockerPayload {
            id: request.id.clone(),
            host: request.host.clone(),
            response: decode_body(&body),
        };
        debug!(%endpoint, host = %payload.host, "gateway: request succeeded");
        self.dispatch(Action::Docker {
            kind: descriptor.action,
            payload: payload.clone(),
        });
        Ok(payload)
    }

    /// Same as [`Gateway::request`], addressed by a `resource.verb` name.
    pub async fn request_namespace(
        &self,
        namespace: &str,
        request: &Request,
    ) -> Result<DockerPayload, GatewayError> {
        let endpoint = namespace.parse::<Endpoint>().map_err(|err| {
            error!(namespace, error = %err, "gateway: unknown endpoint");
            GatewayError::from(err)
        })?;
        self.request(endpoint, request).await
    }

    /// Runs [`Gateway::request`] on its own task so the caller can abandon it.
    pub fn spawn_request(&self, endpoint: Endpoint, request: Request) -> RequestHandle {
        let gateway = self.clone();
        let task = tokio::spawn(async move { gateway.request(endpoint, &request).await });
        RequestHandle { task }
    }

    /// Opens a streaming call. Events are dispatched as nodes complete; the
    /// returned handle mirrors them and reports how the stream ended.
    pub async fn stream(
        &self,
        endpoint: Endpoint,
        request: Request,
    ) -> Result<StreamHandle, GatewayError> {
        if request.patterns.is_empty() {
            return Err(GatewayError::MissingPatterns);
        }
        let patterns = parse_all(&request.patterns)?;

        let descriptor = endpoint.descriptor();
        let url = self.endpoint_url(endpoint, &descriptor, &request)?;
        let mut query = request.query.clone();
        query.extend(flatten_query(request.data.as_ref()));
        debug!(%endpoint, %url, patterns = request.patterns.len(), "stream: opening");

        let response = match self
            .http
            .request(descriptor.method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .query(&query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.transport_failed(endpoint, err)),
        };
        let response = self.check_status(endpoint, response).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let gateway = self.clone();
        let kind = descriptor.action;
        let task = tokio::spawn(async move {
            let Request { host, id, .. } = request;
            let outcome = consume(
                response.bytes_stream(),
                &patterns,
                cancelled(cancel_rx),
                |pattern, node| {
                    let event = StreamEvent {
                        id: id.clone(),
                        host: host.clone(),
                        pattern: pattern.to_string(),
                        response: node.clone(),
                    };
                    gateway.dispatch(Action::DockerStream {
                        kind,
                        event: event.clone(),
                    });
                    // A dropped handle only detaches the observer.
                    let _ = events_tx.send(event);
                },
            )
            .await;

            match &outcome {
                StreamOutcome::Interrupted { events, reason } => {
                    warn!(%endpoint, %host, events, %reason, "stream: interrupted");
                }
                StreamOutcome::Completed { events } => {
                    info!(%endpoint, %host, events, "stream: completed");
                }
                StreamOutcome::Cancelled { events } => {
                    info!(%endpoint, %host, events, "stream: cancelled");
                }
            }
            gateway.dispatch(Action::StreamClosed(StreamClosedPayload {
                id,
                host,
                action: kind,
                outcome: outcome.clone(),
            }));
            outcome
        });

        Ok(StreamHandle::new(events_rx, cancel_tx, task))
    }

    async fn check_status(
        &self,
        endpoint: Endpoint,
        response: Response,
    ) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(self.reject(endpoint, status, &body))
    }

    fn reject(&self, endpoint: Endpoint, status: StatusCode, body: &[u8]) -> GatewayError {
        let body = ApiErrorBody::from_slice(body);
        let message = body.user_message().to_string();

        if status == StatusCode::UNAUTHORIZED {
            warn!(%endpoint, cause = body.cause(), "gateway: credentials rejected, logging out");
            self.dispatch(Action::AuthLogout);
            self.alerts
                .create(AlertRequest::info(INVALID_CREDENTIALS_MESSAGE));
            self.alerts.create(AlertRequest::danger(message));
            return GatewayError::Unauthorized;
        }

        warn!(%endpoint, %status, cause = body.cause(), %message, "gateway: request failed");
        self.alerts.create(AlertRequest::danger(message.clone()));
        GatewayError::Status { status, message }
    }

    fn transport_failed(&self, endpoint: Endpoint, err: reqwest::Error) -> GatewayError {
        warn!(%endpoint, error = %err, "gateway: transport failure");
        self.alerts.create(AlertRequest::danger(err.to_string()));
        GatewayError::Transport(err)
    }

    fn dispatch(&self, action: Action) {
        if let Err(err) = self.dispatcher.dispatch(action) {
            error!(error = %err, "gateway: dispatch failed");
        }
    }
}

#[async_trait]
impl DockerClient for Gateway {
    async fn request(
        &self,
        endpoint: Endpoint,
        request: &Request,
    ) -> Result<DockerPayload, GatewayError> {
        Gateway::request(self, endpoint, request).await
    }

    async fn stream(
        &self,
        endpoint: Endpoint,
        request: Request,
    ) -> Result<StreamHandle, GatewayError> {
        Gateway::stream(self, endpoint, request).await
    }
}

/// An in-flight [`Gateway::spawn_request`].
#[derive(Debug)]
pub struct RequestHandle {
    task: JoinHandle<Result<DockerPayload, GatewayError>>,
}

impl RequestHandle {
    /// Aborts the request. Nothing is dispatched for a request cancelled
    /// before its response arrived.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<DockerPayload, GatewayError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(GatewayError::Cancelled),
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }
}

/// Percent-encodes `value` as one path segment. Values that would read as
/// an empty or dot segment are refused.
fn encode_segment(field: &'static str, value: &str) -> Result<String, GatewayError> {
    if matches!(value, "" | "." | "..") {
        return Err(GatewayError::InvalidSegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(utf8_percent_encode(value, PATH_SEGMENT).to_string())
}

/// Empty bodies decode to `null`, anything that is not JSON to a string.
fn decode_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Top-level fields of a JSON object as query pairs. Nulls are skipped and
/// strings are sent unquoted.
fn flatten_query(data: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(fields)) = data else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), value))
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
