//! HTTP server setup and the tunnel proxy handler.
//!
//! # Responsibilities
//! - Create the Axum router with the config and proxy handlers
//! - Wire up middleware (request ID, tracing)
//! - Run the pre-dispatch checks in order: routing, channel, event-stream,
//!   body size
//! - Dispatch onto the channel and await the correlated response
//! - Apply hot-reloaded tunnel settings
//! - Observability (metrics, correlation IDs)

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, Request},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::blob::BlobOffloadResolver;
use crate::channel::ChannelManager;
use crate::config::{RelayConfig, TunnelConfig};
use crate::error::{RelayError, RelayResult};
use crate::http::request::{original_url, read_body, request_id, wants_event_stream, MakeRequestUuid};
use crate::http::response::completion_response;
use crate::lifecycle::{Collaborators, StartupError};
use crate::observability::metrics;
use crate::routing::{routing_key, RoutingCache};
use crate::tunnel::{RequestContext, RequestDispatcher, TunnelRequest};

/// Static facts reported by the config endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    pub hub_endpoint: String,
    pub blob_location: String,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: RoutingCache,
    pub channels: Arc<ChannelManager>,
    pub dispatcher: RequestDispatcher,
    pub resolver: BlobOffloadResolver,
    pub settings: Arc<ArcSwap<TunnelConfig>>,
    pub info: Arc<RelayInfo>,
    pub request_id_header: HeaderName,
}

/// HTTP server for the tunnel relay.
pub struct HttpServer {
    router: Router,
    config: RelayConfig,
    settings: Arc<ArcSwap<TunnelConfig>>,
}

impl HttpServer {
    /// Create a server whose collaborators are built from `config`.
    pub fn new(config: RelayConfig) -> Result<Self, StartupError> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    /// Create a server around explicit collaborators.
    pub fn with_collaborators(config: RelayConfig, collaborators: Collaborators) -> Result<Self, StartupError> {
        let request_id_header = HeaderName::from_bytes(config.tunnel.request_id_header.as_bytes())
            .map_err(|_| StartupError::RequestIdHeader(config.tunnel.request_id_header.clone()))?;

        let channels = Arc::new(ChannelManager::new(collaborators.connector, &config.channel));
        let settings = Arc::new(ArcSwap::from_pointee(config.tunnel.clone()));

        let state = AppState {
            routes: RoutingCache::new(collaborators.registry, config.routing.cache_ttl()),
            dispatcher: RequestDispatcher::new(channels.clone()),
            channels,
            resolver: BlobOffloadResolver::new(collaborators.blob_store),
            settings: settings.clone(),
            info: Arc::new(RelayInfo {
                hub_endpoint: config.channel.endpoint.clone(),
                blob_location: config.blob_store.location.clone(),
            }),
            request_id_header,
        };

        let router = Self::build_router(state);
        Ok(Self {
            router,
            config,
            settings,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let request_id_header = state.request_id_header.clone();
        Router::new()
            .route("/_relay/config", get(config_handler))
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires, applying config updates as
    /// they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let settings = self.settings.clone();
        let request_id_header = self.config.tunnel.request_id_header.clone();
        tokio::spawn(async move {
            while let Some(update) = config_updates.recv().await {
                apply_tunnel_update(&settings, update.tunnel, &request_id_header);
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Tunnel settings currently in effect.
    pub fn settings(&self) -> Arc<TunnelConfig> {
        self.settings.load_full()
    }
}

/// Swap in reloaded tunnel settings. The request id header is fixed at
/// startup because the middleware was built with it.
fn apply_tunnel_update(settings: &ArcSwap<TunnelConfig>, mut update: TunnelConfig, request_id_header: &str) {
    if update.request_id_header != request_id_header {
        tracing::warn!(
            configured = %update.request_id_header,
            active = %request_id_header,
            "request_id_header cannot change at runtime; keeping the active one"
        );
        update.request_id_header = request_id_header.to_string();
    }
    tracing::info!(
        max_inline_body_bytes = update.max_inline_body_bytes,
        chunk_size_bytes = update.chunk_size_bytes,
        response_timeout_ms = update.response_timeout_ms,
        "Tunnel settings reloaded"
    );
    settings.store(Arc::new(update));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigReport {
    #[serde(flatten)]
    info: RelayInfo,
    host: Option<String>,
}

/// Report where backend clients should attach.
async fn config_handler(State(state): State<AppState>, headers: HeaderMap) -> Json<ConfigReport> {
    Json(ConfigReport {
        info: (*state.info).clone(),
        host: headers
            .get(axum::http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
    })
}

/// Main proxy handler.
/// Resolves the backend client, forwards over the channel and waits.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let method_str = request.method().to_string();

    let response = match relay(&state, addr, request).await {
        Ok((response, mode)) => {
            metrics::record_request(&method_str, response.status().as_u16(), mode, start_time);
            response
        }
        Err(e) => {
            metrics::record_request(&method_str, e.status().as_u16(), e.kind(), start_time);
            e.into_response()
        }
    };
    metrics::record_inflight(state.channels.listeners().len());
    response
}

async fn relay(
    state: &AppState,
    addr: SocketAddr,
    request: Request<Body>,
) -> RelayResult<(Response, &'static str)> {
    let settings = state.settings.load_full();
    let request_id = request_id(request.headers(), &state.request_id_header)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    // 1. Backend client bound to this host
    let key = routing_key(request.headers()).unwrap_or_default();
    let target = match state.routes.lookup(&key).await {
        Ok(Some(target)) => target,
        Ok(None) => {
            tracing::warn!(request_id = %request_id, routing_key = %key, "No tunnel client bound");
            return Err(RelayError::NoBackendBound(key));
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, routing_key = %key, error = %e, "Registry lookup failed");
            return Err(RelayError::RegistryFailure(e));
        }
    };

    // 2. Channel
    let channel = state.channels.acquire().await.map_err(|e| {
        tracing::error!(request_id = %request_id, error = %e, "Tunnel channel unavailable");
        RelayError::ChannelUnavailable(e)
    })?;

    // 3. Event streams cannot be tunneled
    if wants_event_stream(request.headers()) {
        tracing::debug!(request_id = %request_id, "Rejecting event-stream request");
        return Err(RelayError::UnsupportedStreamingRequest);
    }

    // 4. Body
    let (parts, body) = request.into_parts();
    let body = read_body(&parts.headers, body, settings.max_request_body_bytes).await?;
    let tunnel_request = TunnelRequest {
        id: request_id.clone(),
        source_ip: addr.ip().to_string(),
        path: original_url(&parts.uri),
        method: parts.method,
        headers: parts.headers,
        body,
    };

    // Listen before sending so an immediate reply cannot be missed.
    let mut context = RequestContext::new(
        request_id.clone(),
        state.channels.register_listener(),
        settings.response_timeout(),
    );
    metrics::record_inflight(state.channels.listeners().len());

    // A stalled channel must still end in a timeout.
    let sent = context
        .within_deadline(state.dispatcher.dispatch(&channel, &target, &tunnel_request, &settings))
        .await?
        .map_err(|e| {
            tracing::error!(request_id = %request_id, error = %e, "Failed to forward request");
            RelayError::ChannelSend(e)
        })?;
    tracing::debug!(
        request_id = %request_id,
        target = %target,
        mode = sent.mode(),
        body_len = tunnel_request.body_len(),
        "Request forwarded"
    );

    let completion = context.wait().await?;
    let mode = completion.mode();
    tracing::info!(
        request_id = %request_id,
        status = completion.status().as_u16(),
        mode,
        "Served tunnel response"
    );
    let response = completion_response(completion, &state.resolver, &request_id).await?;
    Ok((response, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_keeps_request_id_header() {
        let settings = ArcSwap::from_pointee(TunnelConfig::default());
        let update = TunnelConfig {
            response_timeout_ms: 5_000,
            request_id_header: "x-other".into(),
            ..TunnelConfig::default()
        };

        apply_tunnel_update(&settings, update, "x-amzn-trace-id");
        let current = settings.load();
        assert_eq!(current.response_timeout_ms, 5_000);
        assert_eq!(current.request_id_header, "x-amzn-trace-id");
    }

    #[test]
    fn test_invalid_request_id_header_rejected() {
        let mut config = RelayConfig::default();
        config.tunnel.request_id_header = "bad header".into();
        let collaborators = Collaborators::from_config(&RelayConfig::default()).unwrap();
        assert!(matches!(
            HttpServer::with_collaborators(config, collaborators),
            Err(StartupError::RequestIdHeader(_))
        ));
    }
}
