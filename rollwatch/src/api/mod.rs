//! HTTP registration API.
//!
//! A thin adapter: decode the request, call the session manager, encode
//! the result. All engine behavior lives behind [`SessionManager`].

use crate::cancellation::CancelToken;
use crate::errors::{Error, Result};
use crate::observability::Metrics;
use crate::session::{SessionManager, SessionRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct ApiState {
    manager: Arc<SessionManager>,
    metrics: Arc<Metrics>,
}

/// Success body of `POST /v0/heuristic`.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    /// Printable id of the new session.
    pub session_uuid: String,
}

#[derive(Debug)]
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.0.kind(),
                "detail": self.0.to_string(),
            }
        }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

async fn register(
    State(state): State<ApiState>,
    Json(request): Json<SessionRequest>,
) -> std::result::Result<Json<RegisterResponse>, ApiError> {
    let mut results = state.manager.bootstrap(vec![request]).await;
    match results.pop() {
        Some(Ok(session)) => Ok(Json(RegisterResponse {
            session_uuid: session.to_string(),
        })),
        Some(Err(e)) => Err(ApiError(e)),
        None => Err(ApiError(Error::config("empty bootstrap result"))),
    }
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "healthy": true,
        "metrics": state.metrics.to_dict(),
    }))
}

/// Builds the API router.
#[must_use]
pub fn router(manager: Arc<SessionManager>, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/v0/heuristic", post(register))
        .route("/health", get(health))
        .with_state(ApiState { manager, metrics })
}

/// Serves the API until the token cancels.
pub async fn serve(
    addr: SocketAddr,
    manager: Arc<SessionManager>,
    metrics: Arc<Metrics>,
    cancel: Arc<CancelToken>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, "serving registration API");

    let shutdown = {
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    };

    axum::serve(listener, router(manager, metrics))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::transient(format!("server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertRouter, RouterSettings};
    use serde_json::json;
    use crate::chain::{ChainSources, MockChain};
    use crate::core::{AlertPolicy, HeuristicKind, Network, PipelineMode, Severity};
    use crate::etl::EtlManager;
    use crate::pipeline::PipelineSettings;
    use crate::state::MemoryStateStore;
    use serde_json::Map;

    fn harness() -> (ApiState, Arc<SessionManager>) {
        let root = CancelToken::new();
        let metrics = Arc::new(Metrics::new());
        let chain = Arc::new(MockChain::new());
        let sources = ChainSources::new(chain.clone(), chain);
        let settings = PipelineSettings::default();
        let etl = EtlManager::new(sources.clone(), settings.clone(), metrics.clone(), &root);
        let router = Arc::new(AlertRouter::new(
            RouterSettings::default(),
            metrics.clone(),
            &root,
        ));
        let manager = SessionManager::new(
            etl,
            router,
            sources,
            Arc::new(MemoryStateStore::new()),
            &settings,
            metrics.clone(),
            &root,
        );
        (
            ApiState {
                manager: manager.clone(),
                metrics,
            },
            manager,
        )
    }

    fn request(params: Map<String, serde_json::Value>) -> SessionRequest {
        SessionRequest {
            network: Network::Layer2,
            pipeline_type: PipelineMode::Live,
            heuristic_type: HeuristicKind::BalanceEnforcement,
            start_height: None,
            end_height: None,
            alerting_params: AlertPolicy::new(Severity::Medium, "msg"),
            session_params: params,
        }
    }

    #[tokio::test]
    async fn test_register_returns_session_uuid() {
        let (state, manager) = harness();

        let mut params = Map::new();
        params.insert(
            "address".into(),
            json!("0x00000000000000000000000000000000000000aa"),
        );
        params.insert("lower".into(), json!(3));

        let response = register(State(state), Json(request(params))).await.unwrap();
        assert!(response.0.session_uuid.contains("sess"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_rejects_bad_params() {
        let (state, manager) = harness();

        // No bounds at all: schema passes but the heuristic refuses.
        let mut params = Map::new();
        params.insert(
            "address".into(),
            json!("0x00000000000000000000000000000000000000aa"),
        );

        let result = register(State(state), Json(request(params))).await;
        assert!(result.is_err());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_body_decodes_from_spec_shape() {
        let body = json!({
            "network": "layer1",
            "pipeline_type": "live",
            "heuristic_type": "contract_event",
            "start_height": null,
            "end_height": null,
            "alerting_params": {
                "severity": "low",
                "message": "config changed",
            },
            "session_params": {
                "address": "0x00000000000000000000000000000000000000cc",
                "signatures": ["ConfigUpdate(uint256,uint8,bytes)"],
            },
        });

        let request: SessionRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.network, Network::Layer1);
        assert_eq!(request.heuristic_type, HeuristicKind::ContractEvent);
        assert_eq!(request.alerting_params.severity, Severity::Low);
        assert_eq!(request.alerting_params.cool_down_seconds, 0);
    }
}
