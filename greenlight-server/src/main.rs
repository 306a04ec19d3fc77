use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use greenlight_core::{
    Actor, ApplyOutcome, EntityRecord, EntityStore, FanoutSink, HistoryEntry, MemoryEntityStore,
    NotificationSink, Role, StoreError, TracingSink, TransitionError, TransitionExecutor,
    TransitionNotice, WorkflowRegistry,
};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<TransitionExecutor>,
}

// ─── API types ────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub remarks: Option<String>,
}

type ErrorResponse = (StatusCode, Json<ApiResponse<serde_json::Value>>);

fn fail(status: StatusCode, message: impl Into<String>) -> ErrorResponse {
    (status, Json(ApiResponse::fail(message)))
}

// ─── Actor resolution ─────────────────────────────────────────

/// The resolved principal, read from the `x-actor-id` / `x-actor-role`
/// header pair. Token issuance and verification live in the gateway in
/// front of this service; by the time a request lands here the identity
/// headers are trusted. Absent or unparseable headers are a 401.
pub struct ActorHeaders(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for ActorHeaders
where
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty());
        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse);

        match (id, role) {
            (Some(id), Some(role)) => Ok(ActorHeaders(Actor::new(id, role))),
            _ => Err(fail(
                StatusCode::UNAUTHORIZED,
                "missing or invalid x-actor-id / x-actor-role headers",
            )),
        }
    }
}

// ─── Error mapping ────────────────────────────────────────────

fn transition_error_response(err: TransitionError) -> ErrorResponse {
    let status = match &err {
        TransitionError::NotFound { .. } => StatusCode::NOT_FOUND,
        TransitionError::IllegalTransition { .. } => StatusCode::CONFLICT,
        TransitionError::Conflict { .. } => StatusCode::CONFLICT,
        TransitionError::Forbidden { .. } => StatusCode::FORBIDDEN,
        TransitionError::RemarksTooLong { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TransitionError::Configuration { .. } | TransitionError::Storage(_) => {
            error!(error = %err, "operator-level failure surfaced to a request");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    fail(status, err.to_string())
}

fn store_error_response(err: StoreError) -> ErrorResponse {
    match err {
        StoreError::NotFound(id) => fail(StatusCode::NOT_FOUND, format!("entity {id} not found")),
        other => {
            error!(error = %other, "store failure surfaced to a request");
            fail(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn parse_entity_id(raw: &str) -> Result<Uuid, ErrorResponse> {
    Uuid::parse_str(raw)
        .map_err(|_| fail(StatusCode::BAD_REQUEST, format!("'{raw}' is not a valid id")))
}

// ─── Deletion guard ───────────────────────────────────────────

/// Watches committed `deletion_request` transitions and performs the actual
/// delete of the wrapped entity once the request is approved. The engine
/// itself never reads the request payload; this sink is where
/// `target_entity_id` gains meaning. A rejected request closes without
/// touching the target.
pub struct DeletionGuardSink {
    store: Arc<dyn EntityStore>,
}

impl DeletionGuardSink {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for DeletionGuardSink {
    async fn notify(&self, record: &EntityRecord, notice: &TransitionNotice) {
        if notice.entity_type != "deletion_request" {
            return;
        }
        match notice.to_state.as_str() {
            "permanently_deleted" => {
                let target = record
                    .payload
                    .get("target_entity_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                match target {
                    Some(target_id) => match self.store.remove(target_id).await {
                        Ok(()) => info!(
                            request_id = %notice.entity_id,
                            %target_id,
                            "deletion request approved; target removed"
                        ),
                        Err(e) => warn!(
                            request_id = %notice.entity_id,
                            %target_id,
                            error = %e,
                            "deletion request approved but target removal failed"
                        ),
                    },
                    None => warn!(
                        request_id = %notice.entity_id,
                        "deletion request carries no usable target_entity_id"
                    ),
                }
            }
            "restored_to_draft" => debug!(
                request_id = %notice.entity_id,
                "deletion request rejected; target untouched"
            ),
            _ => {}
        }
    }
}

// ─── Wiring ───────────────────────────────────────────────────

fn build_registry() -> anyhow::Result<WorkflowRegistry> {
    match std::env::var("GREENLIGHT_DEFINITIONS") {
        Ok(path) => {
            info!(%path, "loading workflow definitions from YAML");
            let yaml = std::fs::read_to_string(&path)?;
            WorkflowRegistry::from_yaml(&yaml)
        }
        Err(_) => Ok(WorkflowRegistry::builtin()),
    }
}

async fn build_store() -> anyhow::Result<Arc<dyn EntityStore>> {
    #[cfg(feature = "postgres")]
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        info!("connecting to postgres entity store");
        let store = greenlight_core::PgEntityStore::connect(&database_url).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    info!("using in-memory entity store");
    Ok(Arc::new(MemoryEntityStore::new()))
}

fn build_executor(registry: WorkflowRegistry, store: Arc<dyn EntityStore>) -> TransitionExecutor {
    let sink = FanoutSink::new(vec![
        Arc::new(TracingSink) as Arc<dyn NotificationSink>,
        Arc::new(DeletionGuardSink::new(Arc::clone(&store))),
    ]);
    TransitionExecutor::new(store, Arc::new(registry), Arc::new(sink))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "greenlight_server=info,greenlight_core=info,tower_http=debug".to_string()
        }))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let registry = build_registry()?;
    let store = build_store().await?;
    let executor = Arc::new(build_executor(registry, store));

    let app = create_router(AppState { executor });

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let addr = format!("0.0.0.0:{}", port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/entities/:entity_type", post(submit_entity))
        .route("/entities/:entity_type/:id", get(get_entity))
        .route("/entities/:entity_type/:id/history", get(get_history))
        .route("/entities/:entity_type/:id/:action", post(apply_action))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

// ─── Handlers ─────────────────────────────────────────────────

async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::ok("OK".to_string()))
}

async fn submit_entity(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    ActorHeaders(actor): ActorHeaders,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<ApiResponse<EntityRecord>>), ErrorResponse> {
    // An entity type missing from the registry is a typo'd URL here, not an
    // operator defect, so it maps to 404 instead of the apply-path 500.
    if !state.executor.registry().contains(&entity_type) {
        return Err(fail(
            StatusCode::NOT_FOUND,
            format!("unknown entity type '{entity_type}'"),
        ));
    }

    let record = state
        .executor
        .submit(&entity_type, body.payload, &actor)
        .await
        .map_err(transition_error_response)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(record))))
}

async fn apply_action(
    State(state): State<AppState>,
    Path((entity_type, id, action)): Path<(String, String, String)>,
    ActorHeaders(actor): ActorHeaders,
    body: Option<Json<ApplyRequest>>,
) -> Result<Json<ApiResponse<EntityRecord>>, ErrorResponse> {
    let entity_id = parse_entity_id(&id)?;
    let remarks = body.and_then(|Json(b)| b.remarks);

    let record = state
        .executor
        .store()
        .load(entity_id)
        .await
        .map_err(store_error_response)?;
    if record.entity_type != entity_type {
        return Err(fail(
            StatusCode::NOT_FOUND,
            format!("no {entity_type} with id {entity_id}"),
        ));
    }

    let outcome = match state
        .executor
        .apply(entity_id, &action, &actor, remarks.clone())
        .await
    {
        // One reload-and-retry on a lost CAS race; a second loss surfaces.
        Err(TransitionError::Conflict { .. }) => {
            debug!(%entity_id, %action, "conflict on apply; retrying once");
            state.executor.apply(entity_id, &action, &actor, remarks).await
        }
        other => other,
    }
    .map_err(transition_error_response)?;

    match &outcome {
        ApplyOutcome::Transitioned {
            from_state,
            to_state,
            ..
        } => debug!(%entity_id, %action, %from_state, %to_state, "transition applied"),
        ApplyOutcome::AlreadySatisfied { .. } => {
            debug!(%entity_id, %action, "apply was already satisfied")
        }
    }

    Ok(Json(ApiResponse::ok(outcome.into_record())))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<EntityRecord>>, ErrorResponse> {
    let entity_id = parse_entity_id(&id)?;
    let record = state
        .executor
        .store()
        .load(entity_id)
        .await
        .map_err(store_error_response)?;
    if record.entity_type != entity_type {
        return Err(fail(
            StatusCode::NOT_FOUND,
            format!("no {entity_type} with id {entity_id}"),
        ));
    }
    Ok(Json(ApiResponse::ok(record)))
}

async fn get_history(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<HistoryEntry>>>, ErrorResponse> {
    let entity_id = parse_entity_id(&id)?;
    let record = state
        .executor
        .store()
        .load(entity_id)
        .await
        .map_err(store_error_response)?;
    if record.entity_type != entity_type {
        return Err(fail(
            StatusCode::NOT_FOUND,
            format!("no {entity_type} with id {entity_id}"),
        ));
    }
    Ok(Json(ApiResponse::ok(record.history)))
}

// ─── Tests ────────────────────────────────────────────────────
