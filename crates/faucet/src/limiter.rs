//! Per-client rate limiting

use crate::error::{FaucetError, FaucetResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MAX_TRACKED_CLIENTS: u64 = 100_000;
const CLIENT_IDLE_TTL: Duration = Duration::from_secs(600);

/// One token bucket per client IP, evicted once the client goes quiet
pub struct ClientRateLimiter {
    quota: Quota,
    limiters: moka::future::Cache<IpAddr, Arc<DirectLimiter>>,
}

impl ClientRateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> FaucetResult<Self> {
        let per_minute = NonZeroU32::new(per_minute)
            .ok_or_else(|| FaucetError::Config("rate limit must be positive".into()))?;
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| FaucetError::Config("rate limit burst must be positive".into()))?;

        Ok(Self {
            quota: Quota::per_minute(per_minute).allow_burst(burst),
            limiters: moka::future::Cache::builder()
                .max_capacity(MAX_TRACKED_CLIENTS)
                .time_to_idle(CLIENT_IDLE_TTL)
                .build(),
        })
    }

    /// Take one token for `ip`.
    pub async fn check(&self, ip: IpAddr) -> FaucetResult<()> {
        let quota = self.quota;
        let limiter = self
            .limiters
            .get_with(ip, async move { Arc::new(RateLimiter::direct(quota)) })
            .await;
        limiter.check().map_err(|_| FaucetError::RateLimited)
    }
}
