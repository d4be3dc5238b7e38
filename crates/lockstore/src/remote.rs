//! Client for a `lockd` server

use crate::protocol::{AcquireRequest, AcquireResponse, ErrorBody, SetValueRequest, TokenQuery, ValueResponse};
use crate::{LockError, LockHandle, LockResult, LockStore};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// Slack on top of the acquire wait before the HTTP call itself gives up.
const REQUEST_MARGIN: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lock store served by a remote `lockd`. Every faucet instance pointed at the
/// same server shares the same locks.
pub struct RemoteLockStore {
    base_url: Url,
    client: reqwest::Client,
}

impl RemoteLockStore {
    pub fn new(base_url: &str) -> LockResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LockError::Backend(format!("invalid lock server url {}: {}", base_url, e)))?;
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, name: &str, action: &str) -> LockResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LockError::Backend(format!("lock server url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["locks", name, action]);
        Ok(url)
    }

    async fn check(
        response: reqwest::Response,
        name: &str,
        wait: Duration,
    ) -> LockResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_else(|_| status.to_string());
        Err(match status {
            StatusCode::REQUEST_TIMEOUT => LockError::WaitTimeout {
                name: name.to_string(),
                waited: wait,
            },
            StatusCode::CONFLICT => LockError::NotHeld(name.to_string()),
            _ => LockError::Backend(message),
        })
    }
}

fn transport(e: reqwest::Error) -> LockError {
    LockError::Transport(e.to_string())
}

#[async_trait]
impl LockStore for RemoteLockStore {
    async fn acquire(&self, name: &str, ttl: Duration, wait: Duration) -> LockResult<LockHandle> {
        let response = self
            .client
            .post(self.endpoint(name, "acquire")?)
            .timeout(wait + REQUEST_MARGIN)
            .json(&AcquireRequest {
                ttl_ms: ttl.as_millis() as u64,
                wait_ms: wait.as_millis() as u64,
            })
            .send()
            .await
            .map_err(transport)?;

        let acquired: AcquireResponse = Self::check(response, name, wait)
            .await?
            .json()
            .await
            .map_err(|e| LockError::Codec(e.to_string()))?;
        debug!(lock = name, "remote lock acquired");
        Ok(acquired.into())
    }

    async fn get_value(&self, handle: &LockHandle) -> LockResult<Option<String>> {
        let response = self
            .client
            .get(self.endpoint(&handle.name, "value")?)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .query(&TokenQuery {
                token: handle.token.clone(),
            })
            .send()
            .await
            .map_err(transport)?;

        let body: ValueResponse = Self::check(response, &handle.name, Duration::ZERO)
            .await?
            .json()
            .await
            .map_err(|e| LockError::Codec(e.to_string()))?;
        Ok(body.value)
    }

    async fn set_value(&self, handle: &LockHandle, value: &str) -> LockResult<()> {
        let response = self
            .client
            .put(self.endpoint(&handle.name, "value")?)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(&SetValueRequest {
                token: handle.token.clone(),
                value: value.to_string(),
            })
            .send()
            .await
            .map_err(transport)?;

        Self::check(response, &handle.name, Duration::ZERO).await?;
        Ok(())
    }

    async fn release(&self, handle: LockHandle) -> LockResult<()> {
        let response = self
            .client
            .post(self.endpoint(&handle.name, "release")?)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(&TokenQuery {
                token: handle.token.clone(),
            })
            .send()
            .await
            .map_err(transport)?;

        Self::check(response, &handle.name, Duration::ZERO).await?;
        debug!(lock = %handle.name, "remote lock released");
        Ok(())
    }
}
