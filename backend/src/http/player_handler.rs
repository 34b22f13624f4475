use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::error::EngineError;
use crate::http::AppState;

/// GET /api/players/:id
pub async fn get_player(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, EngineError> {
    let player = state.engine.context().load_player(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(player))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlayerReportRequest {
    #[validate(length(min = 1, max = 64))]
    pub reporter_id: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// POST /api/players/:id/report
pub async fn report_player(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<PlayerReportRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let target = path.into_inner();
    info!(
        reporter_id = %req.reporter_id,
        target_id = %target,
        reason = req.reason.as_deref().unwrap_or(""),
        "Received player report"
    );

    let findings = state
        .engine
        .abuse
        .record_player_report(&req.reporter_id, &target)
        .await?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "target_id": target,
        "findings": findings.len(),
    })))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/players")
            .route("/{id}", web::get().to(get_player))
            .route("/{id}/report", web::post().to(report_player)),
    );
}
