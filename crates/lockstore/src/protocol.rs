//! JSON bodies exchanged between `lockd` and [`RemoteLockStore`](crate::RemoteLockStore)

use crate::LockHandle;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub ttl_ms: u64,
    pub wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub name: String,
    pub token: String,
    pub ttl_ms: u64,
    pub value: Option<String>,
}

impl From<LockHandle> for AcquireResponse {
    fn from(handle: LockHandle) -> Self {
        Self {
            name: handle.name,
            token: handle.token,
            ttl_ms: handle.ttl.as_millis() as u64,
            value: handle.value,
        }
    }
}

impl From<AcquireResponse> for LockHandle {
    fn from(response: AcquireResponse) -> Self {
        LockHandle::new(
            response.name,
            response.token,
            Duration::from_millis(response.ttl_ms),
            response.value,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetValueRequest {
    pub token: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueResponse {
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
