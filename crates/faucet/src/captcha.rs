//! Captcha verification

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Whether the provider accepts `response` from a client at `remote_ip`.
    async fn verify(&self, remote_ip: IpAddr, response: &str) -> FaucetResult<bool>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Google reCAPTCHA `siteverify` client
pub struct RecaptchaVerifier {
    secret: String,
    verify_url: String,
    client: reqwest::Client,
}

impl RecaptchaVerifier {
    pub fn new(secret: &str, verify_url: &str) -> Self {
        Self {
            secret: secret.to_string(),
            verify_url: verify_url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, remote_ip: IpAddr, response: &str) -> FaucetResult<bool> {
        if response.is_empty() {
            return Ok(false);
        }

        let form = [
            ("secret", self.secret.clone()),
            ("response", response.to_string()),
            ("remoteip", remote_ip.to_string()),
        ];
        let reply = self
            .client
            .post(&self.verify_url)
            .timeout(VERIFY_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| FaucetError::CaptchaUnavailable(e.to_string()))?;
        if !reply.status().is_success() {
            return Err(FaucetError::CaptchaUnavailable(format!(
                "verification endpoint returned {}",
                reply.status()
            )));
        }

        let body: SiteVerifyResponse = reply
            .json()
            .await
            .map_err(|e| FaucetError::CaptchaUnavailable(e.to_string()))?;
        if !body.success {
            debug!(ip = %remote_ip, errors = ?body.error_codes, "captcha rejected");
        }
        Ok(body.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Form, Json, Router};
    use std::collections::HashMap;

    async fn spawn_provider() -> String {
        async fn siteverify(Form(form): Form<HashMap<String, String>>) -> Json<serde_json::Value> {
            let ok = form.get("secret").map(String::as_str) == Some("s3cret")
                && form.get("response").map(String::as_str) == Some("human")
                && form.get("remoteip").map(String::as_str) == Some("10.1.2.3");
            if ok {
                Json(serde_json::json!({ "success": true }))
            } else {
                Json(serde_json::json!({ "success": false, "error-codes": ["invalid-input-response"] }))
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/siteverify", post(siteverify));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/siteverify", addr)
    }

    #[tokio::test]
    async fn test_provider_verdicts() {
        let url = spawn_provider().await;
        let verifier = RecaptchaVerifier::new("s3cret", &url);
        let ip: IpAddr = "10.1.2.3".parse().unwrap();

        assert!(verifier.verify(ip, "human").await.unwrap());
        assert!(!verifier.verify(ip, "robot").await.unwrap());
        assert!(!verifier.verify(ip, "").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let verifier = RecaptchaVerifier::new("s3cret", "http://127.0.0.1:1/siteverify");
        let err = verifier
            .verify("10.1.2.3".parse().unwrap(), "human")
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::CaptchaUnavailable(_)));
    }
}
