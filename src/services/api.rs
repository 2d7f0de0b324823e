use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::multipart::Form;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::ClientError;
use crate::models::session::SessionEvent;
use crate::services::session::{SessionEvents, SessionStore};

const REQUEST_ID_HEADER: &str = "x-request-id";

enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Form),
}

/// One outbound backend call: method, path relative to the base URL,
/// optional body and extra headers.
pub struct ApiRequest {
    method: Method,
    path: String,
    body: RequestBody,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ClientError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ClientError::validation(format!("request body is not valid JSON: {e}")))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }
}

/// HTTP client for the analysis backend.
///
/// Attaches the stored bearer token to every call. A 401 from any endpoint
/// clears the stored session, broadcasts [`SessionEvent::Expired`] and
/// surfaces as [`ClientError::SessionExpired`]; redirecting the user is left
/// to whoever listens for the event.
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<dyn SessionStore>,
    events: SessionEvents,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        session: Arc<dyn SessionStore>,
        events: SessionEvents,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            events,
        })
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, returning the raw response when it is a 2xx.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ClientError> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "api_request",
            method = %request.method,
            path = %request.path,
            request_id = %request_id,
        );

        async move {
            let mut builder = self
                .http
                .request(request.method.clone(), self.url(&request.path))
                .header(REQUEST_ID_HEADER, request_id.to_string());

            if let Some(session) = self.session.load() {
                builder = builder.bearer_auth(&session.token);
            }

            for (name, value) in request.headers {
                builder = builder.header(name, value);
            }

            builder = match request.body {
                RequestBody::Empty => builder,
                RequestBody::Json(value) => builder.json(&value),
                RequestBody::Multipart(form) => builder.multipart(form),
            };

            let response = builder.send().await.map_err(|e| {
                tracing::warn!(error = %e, "Backend unreachable");
                ClientError::Network(e.to_string())
            })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                self.evict_session();
                return Err(ClientError::SessionExpired);
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), "Backend returned an error");
                return Err(ClientError::Remote {
                    status_code: status.as_u16(),
                    body,
                });
            }

            tracing::debug!(status = status.as_u16(), "Backend call succeeded");
            Ok(response)
        }
        .instrument(span)
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, ClientError> {
        let response = self.send(ApiRequest::post(path).multipart(form)).await?;
        Ok(response.json::<T>().await?)
    }

    fn evict_session(&self) {
        metrics::counter!("analysis_session_expired_total").increment(1);
        tracing::warn!("Backend rejected credential, clearing stored session");

        if let Err(e) = self.session.clear() {
            tracing::error!(error = %e, "Failed to clear stored session");
        }
        self.events.emit(SessionEvent::Expired);
    }
}
