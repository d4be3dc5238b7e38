//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drip_lockstore::LockError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the ledger node
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The request never reached the node.
    #[error("node unreachable: {0}")]
    Unreachable(String),

    /// The request was sent but no usable answer came back.
    #[error("node request failed: {0}")]
    Transport(String),

    #[error("node rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transaction rejected by node (code {code}): {log}")]
    Rejected { code: u32, log: String },

    #[error("http error code {0} calling node")]
    Status(u16),

    #[error("unexpected node response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Whether a broadcast failing this way may still have landed on the ledger.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, LedgerError::Transport(_) | LedgerError::Rpc { .. })
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            LedgerError::Unreachable(e.to_string())
        } else {
            LedgerError::Transport(e.to_string())
        }
    }
}

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("shoo robot, recaptcha failed")]
    CaptchaRejected,

    #[error("captcha verification unavailable: {0}")]
    CaptchaUnavailable(String),

    #[error("rate limit exceeded, try again later")]
    RateLimited,

    #[error("lock store error: {0}")]
    Lock(#[from] LockError),

    #[error("broadcast did not complete within {0:?}, account scheduled for repair")]
    Timeout(Duration),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("account repair failed: {0}")]
    RepairFailed(#[source] LedgerError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("corrupt value stored under {name}: {value:?}")]
    CorruptState { name: String, value: Option<String> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    pub fn status(&self) -> StatusCode {
        match self {
            FaucetError::InvalidRequest(_) | FaucetError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            FaucetError::CaptchaRejected => StatusCode::FORBIDDEN,
            FaucetError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            FaucetError::Lock(_) => StatusCode::SERVICE_UNAVAILABLE,
            FaucetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FaucetError::Ledger(_) | FaucetError::RepairFailed(_) => StatusCode::BAD_GATEWAY,
            FaucetError::CaptchaUnavailable(_)
            | FaucetError::Signing(_)
            | FaucetError::Encoding(_)
            | FaucetError::CorruptState { .. }
            | FaucetError::Config(_)
            | FaucetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for the claim outcome metric.
    pub fn kind(&self) -> &'static str {
        match self {
            FaucetError::InvalidRequest(_) => "invalid_request",
            FaucetError::InvalidAddress(_) => "invalid_address",
            FaucetError::CaptchaRejected => "captcha_rejected",
            FaucetError::CaptchaUnavailable(_) => "captcha_unavailable",
            FaucetError::RateLimited => "rate_limited",
            FaucetError::Lock(_) => "lock_error",
            FaucetError::Timeout(_) => "timeout",
            FaucetError::Ledger(LedgerError::Rejected { .. }) => "rejected",
            FaucetError::Ledger(_) => "node_error",
            FaucetError::RepairFailed(_) => "repair_failed",
            FaucetError::Signing(_) => "signing_error",
            FaucetError::Encoding(_) => "encoding_error",
            FaucetError::CorruptState { .. } => "corrupt_state",
            FaucetError::Config(_) => "config_error",
            FaucetError::Internal(_) => "internal_error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FaucetError::Timeout(_))
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
