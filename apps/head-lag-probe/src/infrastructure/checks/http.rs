//! HTTP plumbing shared by the metadata checks and the REST pollers.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::application::ports::ErrorKind;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Mobula REST base URL.
pub const MOBULA_REST_BASE_URL: &str = "https://api.mobula.io";

/// Codex GraphQL HTTP endpoint.
pub const CODEX_GRAPHQL_URL: &str = "https://graph.codex.io/graphql";

/// Errors from a single REST call.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// No response within [`REQUEST_TIMEOUT`].
    #[error("request timed out")]
    Timeout,

    /// Transport failure.
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The body did not match the expected shape.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// GraphQL-level error in a 200 response.
    #[error("graphql error: {0}")]
    Graphql(String),

    /// The provider has no record of the token.
    #[error("token not found")]
    NotFound,

    /// An HTML page lacked its embedded data block.
    #[error("embedded page data not found")]
    PageDataMissing,
}

impl From<reqwest::Error> for CheckError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

impl CheckError {
    /// Metric label for this failure.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Client(_) | Self::Request(_) => ErrorKind::RequestError.as_str().to_string(),
            Self::Timeout => ErrorKind::Timeout.as_str().to_string(),
            Self::Status(status) => format!("status_{status}"),
            Self::Parse(_) => ErrorKind::ParseError.as_str().to_string(),
            Self::Graphql(_) => "graphql_error".to_string(),
            Self::NotFound => "token_not_found".to_string(),
            Self::PageDataMissing => "next_data_not_found".to_string(),
        }
    }

    /// REST error class for this failure.
    #[must_use]
    pub const fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Status(status) => match categorize_status(*status) {
                Some(kind) => kind,
                None => ErrorKind::RequestError,
            },
            Self::Parse(_) | Self::Graphql(_) | Self::NotFound | Self::PageDataMissing => {
                ErrorKind::ParseError
            }
            Self::Client(_) | Self::Request(_) => ErrorKind::RequestError,
        }
    }
}

/// Failure class of an HTTP status, or `None` for non-error statuses.
#[must_use]
pub const fn categorize_status(status: u16) -> Option<ErrorKind> {
    match status {
        500.. => Some(ErrorKind::ServerError),
        400..=499 => Some(ErrorKind::ClientError),
        _ => None,
    }
}

/// Build the shared client.
///
/// # Errors
///
/// Returns [`CheckError::Client`] if the TLS backend fails to initialize.
pub fn build_client() -> Result<Client, CheckError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| CheckError::Client(e.to_string()))
}

/// Send `request` and decode a JSON body.
///
/// The latency covers the round trip up to the response headers.
pub async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> (Duration, Result<T, CheckError>) {
    let (latency, response) = send(request).await;
    let body = match response {
        Ok(response) => response.json::<T>().await.map_err(CheckError::from),
        Err(e) => Err(e),
    };
    (latency, body)
}

/// Send `request` and read the body as text.
pub async fn fetch_text(request: RequestBuilder) -> (Duration, Result<String, CheckError>) {
    let (latency, response) = send(request).await;
    let body = match response {
        Ok(response) => response.text().await.map_err(CheckError::from),
        Err(e) => Err(e),
    };
    (latency, body)
}

async fn send(request: RequestBuilder) -> (Duration, Result<Response, CheckError>) {
    let started = Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return (started.elapsed(), Err(e.into())),
    };
    let latency = started.elapsed();

    let status = response.status();
    if !status.is_success() {
        return (latency, Err(CheckError::Status(status.as_u16())));
    }
    (latency, Ok(response))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(200, None)]
    #[test_case(304, None)]
    #[test_case(404, Some(ErrorKind::ClientError))]
    #[test_case(429, Some(ErrorKind::ClientError))]
    #[test_case(500, Some(ErrorKind::ServerError))]
    #[test_case(503, Some(ErrorKind::ServerError))]
    fn status_categories(status: u16, expected: Option<ErrorKind>) {
        assert_eq!(categorize_status(status), expected);
    }

    #[test]
    fn failure_labels() {
        assert_eq!(CheckError::Status(404).label(), "status_404");
        assert_eq!(CheckError::Timeout.label(), "timeout_error");
        assert_eq!(CheckError::NotFound.label(), "token_not_found");
        assert_eq!(CheckError::PageDataMissing.label(), "next_data_not_found");
        assert_eq!(CheckError::Request("reset".into()).label(), "request_error");
    }

    #[test]
    fn status_errors_map_to_rest_classes() {
        assert_eq!(CheckError::Status(502).error_kind(), ErrorKind::ServerError);
        assert_eq!(CheckError::Status(401).error_kind(), ErrorKind::ClientError);
        assert_eq!(CheckError::Timeout.error_kind(), ErrorKind::Timeout);
    }
}
