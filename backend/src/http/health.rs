use actix_web::{web, HttpResponse, Result};

use crate::error::EngineError;
use crate::http::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let database = match &state.pool {
        Some(pool) => {
            crate::db::health_check(pool).await?;
            "ok"
        }
        None => "memory",
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "database": database,
        "pending_timeouts": state.engine.reconciler.pending_timeouts(),
    })))
}
