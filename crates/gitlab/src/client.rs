use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::warn;

use orchestration::{ErrorClass, ExternalError, ATTEMPT_ERROR_LIMIT};

/// Connection settings for one GitLab instance.
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    /// Instance root, e.g. `https://gitlab.com`.
    pub base_url: String,
    /// Bot personal access token, sent as `PRIVATE-TOKEN`.
    pub token: String,
    /// Pipeline trigger token.
    pub trigger_token: String,
    pub timeout: Duration,
}

/// Thin REST client. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    pub(crate) trigger_token: String,
}

impl GitLabClient {
    pub fn new(config: GitLabConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            trigger_token: config.trigger_token,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path))
    }

    /// Sends an authenticated request and classifies any failure.
    pub(crate) async fn send(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<Response, ExternalError> {
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(context, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(ATTEMPT_ERROR_LIMIT).collect();
        warn!(context, status = status.as_u16(), %body, "GitLab API error");
        Err(ExternalError::new(classify_status(status.as_u16()), context, body)
            .with_status(status.as_u16()))
    }

    /// Sends a request and decodes its JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<T, ExternalError> {
        self.send(request, context)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(context, &e))
    }
}

/// Maps an HTTP status to its error class.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 | 500 | 502 | 503 | 504 | 529 => ErrorClass::Transient,
        400 => ErrorClass::InvalidRequest,
        401 => ErrorClass::Authentication,
        403 => ErrorClass::Forbidden,
        404 => ErrorClass::NotFound,
        _ => ErrorClass::Unknown,
    }
}

fn transport_error(context: &'static str, error: &reqwest::Error) -> ExternalError {
    let class = if error.is_timeout() || error.is_connect() || error.is_body() {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    };
    ExternalError::new(class, context, error.to_string())
}
