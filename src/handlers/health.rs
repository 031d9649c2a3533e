use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};

use crate::{AppState, store::Store};

pub async fn health<S: Store>(State(state): State<AppState<S>>) -> (StatusCode, Json<Value>) {
    let database = state.store.ping().await.is_ok();
    let redis = state.sessions.ping().await.is_ok();

    let status = if database && redis {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "database": database,
            "redis": redis,
        })),
    )
}
