//! Runtime log filter control.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, UpdateLogFilterRequest};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

fn logging_config(state: &AppState) -> ApiResult<&crate::logging::LoggingConfig> {
    state
        .logging_config
        .as_deref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
}

async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let filter = logging_config(&state)?.get_filter();
    Ok(Json(LoggingConfigResponse { filter }))
}

async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    config.set_filter(&request.filter)?;
    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
    }))
}
