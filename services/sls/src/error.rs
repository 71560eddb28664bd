use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;

/// Result of a log service call.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by [`RequestExecutor`](crate::RequestExecutor).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local precondition failed: missing header, malformed url, signer
    /// misconfiguration. Never retried.
    #[error("client error: {0}")]
    Client(#[source] slsreq_core::Error),
    /// The HTTP exchange itself failed. Always retryable.
    #[error("transport error: {0}")]
    Transport(#[source] slsreq_core::Error),
    /// The service answered with a well formed error.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The service answered with an error we can't read.
    #[error(transparent)]
    BadResponse(#[from] BadResponseError),
    /// No valid credential could be obtained. The provider keeps working,
    /// a later call may succeed.
    #[error("credentials error: {0}")]
    Credentials(#[source] slsreq_core::Error),
}

impl Error {
    /// Sort a signing failure into credentials or client error.
    pub(crate) fn from_sign(err: slsreq_core::Error) -> Self {
        if err.is_credential_error() {
            Error::Credentials(err)
        } else {
            Error::Client(err)
        }
    }

    /// Status code of the response, if the service answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Service(e) => Some(e.status),
            Error::BadResponse(e) => Some(e.status),
            _ => None,
        }
    }

    /// Value of the `x-log-requestid` response header, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::Service(e) => e.request_id.as_deref(),
            Error::BadResponse(e) => e.request_id.as_deref(),
            _ => None,
        }
    }
}

/// ServiceError is a well formed error answered by the log service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("service error: status {status}, code {code}, message {message}, request id {}", .request_id.as_deref().unwrap_or("-"))]
pub struct ServiceError {
    /// HTTP status of the response.
    pub status: StatusCode,
    /// Machine readable error code, like `ProjectNotExist`.
    pub code: String,
    /// Human readable error message.
    pub message: String,
    /// Value of the `x-log-requestid` response header.
    pub request_id: Option<String>,
}

/// BadResponseError is a non-200 response whose body isn't a service error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bad response: status {status}, request id {}", .request_id.as_deref().unwrap_or("-"))]
pub struct BadResponseError {
    /// HTTP status of the response.
    pub status: StatusCode,
    /// Headers of the response.
    pub headers: HeaderMap,
    /// Raw body of the response.
    pub body: Bytes,
    /// Value of the `x-log-requestid` response header.
    pub request_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: String,
    error_message: String,
}

/// Build the error for a non-200 response.
pub(crate) fn parse_error_response(
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    request_id: Option<String>,
) -> Error {
    match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(v) => Error::Service(ServiceError {
            status,
            code: v.error_code,
            message: v.error_message,
            request_id,
        }),
        Err(err) => {
            log::debug!("response body of status {status} is not a service error: {err}");
            Error::BadResponse(BadResponseError {
                status,
                headers,
                body,
                request_id,
            })
        }
    }
}
