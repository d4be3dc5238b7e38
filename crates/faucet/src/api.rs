//! HTTP API for the faucet service

use crate::claim::ClaimResponse;
use crate::error::FaucetError;
use crate::service::FaucetService;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Body of `GET /`
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
    pub name: String,
    pub version: String,
}

/// Build the faucet router.
pub fn build_router(service: Arc<FaucetService>) -> Router {
    let mut claim_routes: Router<Arc<FaucetService>> =
        Router::new().route("/v1/claim", post(claim_handler));
    if service.is_rate_limited() {
        claim_routes = claim_routes.route_layer(middleware::from_fn_with_state(
            service.clone(),
            rate_limit_middleware,
        ));
    }

    let config = service.config();
    let cors = cors_layer(config.allows_any_origin(), &config.allowed_origins);

    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .merge(claim_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(any_origin: bool, origins: &[String]) -> CorsLayer {
    let allow_origin = if any_origin {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Client address. With `trust_forwarded` set: first `X-Forwarded-For` hop,
/// then `X-Real-IP`, then the peer. Otherwise the peer only.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> IpAddr {
    let peer_ip = peer.map(|addr| addr.ip());
    if !trust_forwarded {
        return peer_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || -> Option<IpAddr> {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };

    forwarded
        .or_else(real_ip)
        .or(peer_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn request_ip(request: &Request, trust_forwarded: bool) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(request.headers(), peer, trust_forwarded)
}

async fn rate_limit_middleware(
    State(service): State<Arc<FaucetService>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = request_ip(&request, service.config().trust_forwarded_headers);
    match service.check_rate_limit(ip).await {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!("[{}] rate limited", ip);
            e.into_response()
        }
    }
}

/// Root handler: network and version
pub async fn root_handler(State(service): State<Arc<FaucetService>>) -> Json<RootResponse> {
    Json(RootResponse {
        message: String::new(),
        name: service.network_id().to_string(),
        version: service.version().to_string(),
    })
}

/// Claim handler
pub async fn claim_handler(
    State(service): State<Arc<FaucetService>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ClaimResponse>, FaucetError> {
    let ip = client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        service.config().trust_forwarded_headers,
    );

    match service.claim(&body, ip).await {
        Ok(response) => {
            info!("[{}] claim committed: hash={} height={}", ip, response.hash, response.height);
            Ok(Json(response))
        }
        Err(e) => {
            if e.status().is_server_error() {
                error!("[{}] claim failed: {}", ip, e);
            } else {
                warn!("[{}] claim refused: {}", ip, e);
            }
            Err(e)
        }
    }
}

/// Prometheus text exposition
pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.metrics().gather() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
