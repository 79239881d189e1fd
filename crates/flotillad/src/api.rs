//! REST API.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/templates` | List node templates |
//! | POST | `/api/v1/provision` | Request `units` nodes for `label` |
//! | GET | `/api/v1/nodes` | List registered nodes |
//! | DELETE | `/api/v1/nodes/{name}` | Retire a node and remove its instance |
//! | POST | `/api/v1/agents/{name}/online` | Agent callback: node is online |
//! | POST | `/api/v1/agents/{name}/offline` | Agent callback: node disconnected |
//!
//! Agent callbacks must carry the node's connection secret in the
//! `x-flotilla-secret` header.
//!
//! Every response is an [`ApiResponse`] envelope. Handlers return
//! [`ApiResult`], and errors map onto status codes in one place.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use flotilla_provision::{CloudProvisioner, PendingUnit, ProvisionError, ProvisionedNode};
use flotilla_registry::{NodeStatus, NodeView, RegistryError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SECRET_HEADER: &str = "x-flotilla-secret";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<CloudProvisioner>,
    /// Watchers for in-flight provisioning tasks.
    inflight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AppState {
    pub fn new(provisioner: Arc<CloudProvisioner>) -> Self {
        Self {
            provisioner,
            inflight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wait for every provisioning task started through the API to finish.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.inflight.lock().await);
        info!(tasks = handles.len(), "waiting for in-flight provisioning");
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "provisioning watcher ended abnormally");
            }
        }
    }

    async fn track(&self, unit: PendingUnit) {
        let display_name = unit.display_name.clone();
        let handle = tokio::spawn(async move {
            match unit.join().await {
                Ok(node) => info!(node = %node.name, instance = %node.instance, %display_name, "node ready"),
                Err(err) => warn!(node = ?err.node(), error = %err, %display_name, "provisioning failed"),
            }
        });
        let mut inflight = self.inflight.lock().await;
        inflight.retain(|h| !h.is_finished());
        inflight.push(handle);
    }
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/templates", get(list_templates))
        .route("/provision", post(provision))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{name}", delete(retire_node))
        .route("/agents/{name}/online", post(agent_online))
        .route("/agents/{name}/offline", post(agent_offline))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

/// Envelope shared by every endpoint.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// A failed request: the status to answer with and the message to carry.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let status = match &err {
            ProvisionError::Unsatisfiable(_) | ProvisionError::Label(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ProvisionError::UnknownNode(_) => StatusCode::NOT_FOUND,
            ProvisionError::Terminate(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyRegistered(_) => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

pub(crate) type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ── Templates ──────────────────────────────────────────────────

#[derive(Serialize)]
struct TemplateView {
    display_name: String,
    labels: String,
    image: String,
    size: String,
    remote_root: String,
}

/// GET /api/v1/templates
async fn list_templates(State(state): State<AppState>) -> ApiResult<Vec<TemplateView>> {
    let cloud = state.provisioner.cloud_name();
    let templates = state
        .provisioner
        .templates()
        .iter()
        .map(|t| TemplateView {
            display_name: t.display_name(cloud),
            labels: t.labels().to_string(),
            image: t.image().to_string(),
            size: t.size().to_string(),
            remote_root: t.remote_root().to_string(),
        })
        .collect();
    Ok(ApiResponse::ok(templates))
}

// ── Provisioning ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub label: Option<String>,
    pub units: u32,
}

#[derive(Serialize)]
struct ProvisionAccepted {
    label: Option<String>,
    display_name: String,
    accepted: usize,
}

/// POST /api/v1/provision
async fn provision(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProvisionAccepted>>), ApiError> {
    let max = state.provisioner.max_units_per_request();
    if req.units == 0 || req.units > max {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("units must be between 1 and {max}"),
        ));
    }
    let label = req.label.as_deref();
    match state.provisioner.template_for(label) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(ProvisionError::Unsatisfiable(req.label.clone()).into()),
        Err(err) => return Err(ProvisionError::from(err).into()),
    }

    let units = state.provisioner.provision(label, req.units);
    let display_name = units.first().map(|u| u.display_name.clone()).unwrap_or_default();
    let accepted = units.len();
    for unit in units {
        state.track(unit).await;
    }

    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::ok(ProvisionAccepted {
            label: req.label,
            display_name,
            accepted,
        }),
    ))
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
async fn list_nodes(State(state): State<AppState>) -> ApiResult<Vec<NodeView>> {
    Ok(ApiResponse::ok(state.provisioner.registry().list().await))
}

/// DELETE /api/v1/nodes/{name}
async fn retire_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ProvisionedNode> {
    Ok(ApiResponse::ok(state.provisioner.retire_by_name(&name).await?))
}

// ── Agent callbacks ────────────────────────────────────────────

/// POST /api/v1/agents/{name}/online
async fn agent_online(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<NodeStatus> {
    set_agent_status(&state, &name, &headers, NodeStatus::Online).await
}

/// POST /api/v1/agents/{name}/offline
async fn agent_offline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<NodeStatus> {
    set_agent_status(&state, &name, &headers, NodeStatus::Offline).await
}

async fn set_agent_status(
    state: &AppState,
    name: &str,
    headers: &HeaderMap,
    status: NodeStatus,
) -> ApiResult<NodeStatus> {
    let registry = state.provisioner.registry();
    if !registry.exists(name).await {
        return Err(RegistryError::NotFound(name.to_string()).into());
    }
    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !state.provisioner.verify_agent(name, presented).await {
        warn!(node = %name, "agent callback with bad secret");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid agent secret"));
    }

    registry.set_status(name, status).await?;
    info!(node = %name, ?status, "agent reported");
    Ok(ApiResponse::ok(status))
}

#[cfg(test)]
mod tests {
    use flotilla_core::{ExpressionMatcher, FlotillaConfig};
    use flotilla_registry::{ConfigCredentialStore, InMemoryRegistry};
    use tokio::sync::watch;

    use super::*;
    use crate::dry_run::dry_run_runner;

    fn state() -> (AppState, watch::Sender<bool>) {
        let config = FlotillaConfig::parse(
            r#"
[cloud]
callback_url = "http://ci.local:8080/"
agent_secret = "s3cret"

[[templates]]
labels = "linux"
image = "agent:linux"
size = "s1"
remote_root = "/home/agent"
"#,
        )
        .unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let provisioner = CloudProvisioner::from_config(
            &config,
            Arc::new(ExpressionMatcher),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(ConfigCredentialStore::new(config.credentials.clone())),
            Arc::new(dry_run_runner()),
            shutdown_rx,
        )
        .unwrap();
        (AppState::new(Arc::new(provisioner)), shutdown)
    }

    #[tokio::test]
    async fn drain_survives_a_panicked_watcher() {
        let (state, _shutdown) = state();
        let panicked = tokio::spawn(async { panic!("watcher blew up") });
        let finished = tokio::spawn(async {});
        state.inflight.lock().await.extend([panicked, finished]);

        state.drain().await;
        assert!(state.inflight.lock().await.is_empty());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (ApiError::from(ProvisionError::Unsatisfiable(None)), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::from(ProvisionError::UnknownNode("n".into())), StatusCode::NOT_FOUND),
            (ApiError::from(RegistryError::NotFound("n".into())), StatusCode::NOT_FOUND),
            (ApiError::from(RegistryError::AlreadyRegistered("n".into())), StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
