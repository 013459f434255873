use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::WebhookError;
use crate::metrics;
use crate::metrics::WEBHOOK_ERRORS;
use crate::models::{Credential, WebhookRegistration};
use crate::service::WebhookService;

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        WEBHOOK_ERRORS.inc();
        error!("{}", self);
        (
            self.status_code(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Build the full HTTP surface: the webhooks API, credentials, health
/// probes, metrics, and the static web bundle when configured.
pub fn router(service: Arc<WebhookService>) -> Router {
    let mut router = Router::new()
        .route("/webhooks", get(get_all_webhooks).post(create_webhook))
        .route("/webhooks/defaults", get(get_defaults))
        .route("/webhooks/{name}", axum::routing::delete(delete_webhook))
        .route(
            "/webhooks/credentials",
            get(get_all_credentials).post(create_credential),
        )
        .route(
            "/webhooks/credentials/{name}",
            axum::routing::delete(delete_credential),
        )
        .route("/liveness", get(health_check))
        .route("/readiness", get(health_check))
        .route("/metrics", get(serve_metrics))
        .with_state(service);

    if let Ok(web_dir) = std::env::var("WEB_RESOURCES_DIR") {
        info!("Serving static files from WEB_RESOURCES_DIR: {}", web_dir);
        router = router.nest_service("/web", ServeDir::new(web_dir));
    }

    router.layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn serve_metrics() -> impl IntoResponse {
    (StatusCode::OK, metrics::gather())
}

async fn create_webhook(
    State(service): State<Arc<WebhookService>>,
    Json(webhook): Json<WebhookRegistration>,
) -> Result<StatusCode, WebhookError> {
    service.create(webhook).await?;
    Ok(StatusCode::CREATED)
}

async fn get_all_webhooks(
    State(service): State<Arc<WebhookService>>,
) -> Result<Json<Vec<WebhookRegistration>>, WebhookError> {
    Ok(Json(service.list().await?))
}

async fn get_defaults(State(service): State<Arc<WebhookService>>) -> impl IntoResponse {
    Json(service.defaults().clone())
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    repository: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    deletepipelineruns: String,
}

async fn delete_webhook(
    State(service): State<Arc<WebhookService>>,
    Path(name): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, WebhookError> {
    let delete_pipeline_runs = match query.deletepipelineruns.as_str() {
        "" => false,
        value => value.parse::<bool>().map_err(|_| {
            WebhookError::Validation(
                "bad request information provided, cannot handle deletepipelineruns query \
                 (should be set to true or not provided)"
                    .to_string(),
            )
        })?,
    };

    service
        .delete(&name, &query.repository, &query.namespace, delete_pipeline_runs)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_credential(
    State(service): State<Arc<WebhookService>>,
    Json(credential): Json<Credential>,
) -> Result<StatusCode, WebhookError> {
    service.create_credential(credential).await?;
    Ok(StatusCode::CREATED)
}

async fn get_all_credentials(
    State(service): State<Arc<WebhookService>>,
) -> Result<Json<Vec<Credential>>, WebhookError> {
    Ok(Json(service.list_credentials().await?))
}

async fn delete_credential(
    State(service): State<Arc<WebhookService>>,
    Path(name): Path<String>,
) -> Result<StatusCode, WebhookError> {
    service.delete_credential(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
