//! Prometheus metrics for the faucet

use crate::error::{FaucetError, FaucetResult};
use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::time::Duration;

/// Faucet metrics, registered on a registry owned by the instance
#[derive(Debug)]
pub struct FaucetMetrics {
    registry: Registry,

    /// Claims by outcome
    pub claims_total: IntCounterVec,
    /// Time from broadcast start until the node answered
    pub broadcast_duration: Histogram,
    /// Repair attempts by result
    pub repairs_total: IntCounterVec,
    /// 1 while this instance last saw the account flagged broken
    pub account_broken: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            opts!("faucet_claims_total", "Claims handled, by outcome"),
            &["outcome"],
        )?;
        let broadcast_duration = Histogram::with_opts(histogram_opts!(
            "faucet_broadcast_duration_seconds",
            "Time spent waiting for broadcasts to commit",
            vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0]
        ))?;
        let repairs_total = IntCounterVec::new(
            opts!("faucet_repairs_total", "Account repairs, by result"),
            &["result"],
        )?;
        let account_broken = IntGauge::with_opts(opts!(
            "faucet_account_broken",
            "Whether the faucet account is waiting for repair"
        ))?;

        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(broadcast_duration.clone()))?;
        registry.register(Box::new(repairs_total.clone()))?;
        registry.register(Box::new(account_broken.clone()))?;

        Ok(Self {
            registry,
            claims_total,
            broadcast_duration,
            repairs_total,
            account_broken,
        })
    }

    pub fn record_claim(&self, outcome: &str) {
        self.claims_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_broadcast(&self, elapsed: Duration) {
        self.broadcast_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_repair(&self, result: &str) {
        self.repairs_total.with_label_values(&[result]).inc();
    }

    pub fn set_broken(&self, broken: bool) {
        self.account_broken.set(i64::from(broken));
    }

    /// Text exposition of every metric.
    pub fn gather(&self) -> FaucetResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| FaucetError::Internal(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| FaucetError::Internal(e.to_string()))
    }
}
