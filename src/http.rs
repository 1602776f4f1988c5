//! Uniform `{code, msg, data}` envelope shared by master and node, plus the
//! small reqwest helpers both sides use to talk to each other.

use std::time::Duration;

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const CODE_SUCCESS: i32 = 0;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: "success".into(),
            data: Some(data),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Unwraps a successful envelope into its data, treating a non-zero code as failure.
    pub fn into_result(self) -> Result<Option<T>, RemoteError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(RemoteError::Code {
                code: self.code,
                msg: self.msg,
            })
        }
    }
}

impl Envelope<()> {
    pub fn empty() -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: "success".into(),
            data: None,
        }
    }
}

impl From<&Error> for Envelope<()> {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            msg: err.to_string(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

// Errors travel inside a 200 envelope; the code carries the failure.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if !self.is_validation() {
            tracing::warn!(error = %self, code = self.code(), "request failed");
        }
        Envelope::<()>::from(&self).into_response()
    }
}

/// Failure talking to a peer: either the transport broke or the peer answered with a non-zero code.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote code {code}: {msg}")]
    Code { code: i32, msg: String },
}

impl RemoteError {
    /// True when the peer never answered: connect failure or timeout.
    pub fn is_unreachable(&self) -> bool {
        match self {
            RemoteError::Transport(e) => e.is_connect() || e.is_timeout(),
            RemoteError::Code { .. } => false,
        }
    }
}

/// Every peer call goes through a client built here, so every call has a timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

pub fn url(address: &str, path: &str) -> String {
    format!("http://{}{}", address, path)
}

/// Reads the body as an envelope; HTTP status is not trusted on its own.
pub async fn parse_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, RemoteError> {
    let envelope: Envelope<T> = response.error_for_status()?.json().await?;
    envelope.into_result()
}
