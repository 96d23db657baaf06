use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Result alias for client-level operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the attendee client across its components.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The user refused access to motion sensors.
    #[error("motion permission denied")]
    PermissionDenied,
    /// The device exposes no motion sensor.
    #[error("motion sensing is not supported on this device")]
    UnsupportedDevice,
    /// Asking for motion permission failed before the user could answer.
    #[error("motion permission request failed: {0}")]
    PermissionRequestFailed(String),
    /// The push channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The push channel gave up reconnecting.
    #[error("push channel gave up after {failures} consecutive failed connections")]
    ReconnectExhausted { failures: u32 },
    /// A push frame could not be decoded.
    #[error("malformed push message: {reason}")]
    MalformedMessage { reason: String },
    /// A persisted round ended while the client was away.
    #[error("persisted round ended at {end_time_ms}")]
    StaleSession { end_time_ms: i64 },
    /// An HTTP call to the event backend failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Local storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of the duplex push channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be parsed into a URL.
    #[error("invalid push endpoint `{endpoint}`")]
    InvalidEndpoint { endpoint: String },
    /// Opening the connection failed.
    #[error("failed to connect to `{url}`: {message}")]
    Connect { url: String, message: String },
    /// Writing a frame failed.
    #[error("failed to send frame: {0}")]
    Send(String),
    /// Reading a frame failed.
    #[error("failed to receive frame: {0}")]
    Receive(String),
}

/// Failures talking to the event backend over HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent or timed out.
    #[error("failed to send request to `{path}`")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The backend answered with a non-success HTTP status.
    #[error("unexpected response status {status} for `{path}`")]
    Status { path: String, status: StatusCode },
    /// The response body was not the expected envelope.
    #[error("failed to decode response for `{path}`")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The token is missing, expired or revoked.
    #[error("unauthorized")]
    Unauthorized,
    /// The backend rejected the call with an application code.
    #[error("request rejected with code {code}: {msg}")]
    Rejected { code: i64, msg: String },
    /// A successful response carried no data where some was required.
    #[error("response for `{path}` carried no data")]
    MissingData { path: String },
    /// The request body failed local validation.
    #[error("invalid request: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Reasons motion listening could not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MotionError {
    #[error("motion permission denied")]
    PermissionDenied,
    #[error("motion sensing is not supported on this device")]
    UnsupportedDevice,
    #[error("motion permission request failed: {0}")]
    PermissionRequestFailed(String),
}

impl From<MotionError> for ClientError {
    fn from(err: MotionError) -> Self {
        match err {
            MotionError::PermissionDenied => ClientError::PermissionDenied,
            MotionError::UnsupportedDevice => ClientError::UnsupportedDevice,
            MotionError::PermissionRequestFailed(reason) => {
                ClientError::PermissionRequestFailed(reason)
            }
        }
    }
}
