//! # GET /
//!
//! 死活監視用。

use axum::Json;
use custody_types::HealthResponse;

/// GET /: 固定のメッセージを返す。
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "hello world".to_string(),
    })
}
