use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::EngineError;
use crate::http::AppState;

// =============================================================================
// CREATE MATCH
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMatchRequest {
    #[validate(length(min = 1, max = 64))]
    pub player_a: String,
    #[validate(length(min = 1, max = 64))]
    pub player_b: String,
}

/// POST /api/matches
pub async fn create_match(
    state: web::Data<AppState>,
    req: web::Json<CreateMatchRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    info!(player_a = %req.player_a, player_b = %req.player_b, "Received create match request");

    let m = state
        .engine
        .reconciler
        .create_match(&req.player_a, &req.player_b)
        .await?;
    Ok(HttpResponse::Created().json(m))
}

/// GET /api/matches/:id
pub async fn get_match(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let m = state.engine.reconciler.get_match(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(m))
}

/// POST /api/matches/:id/start
pub async fn start_match(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let m = state.engine.reconciler.start_match(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(m))
}

/// POST /api/matches/:id/cancel
pub async fn cancel_match(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let m = state.engine.reconciler.cancel_match(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(m))
}

// =============================================================================
// REPORTS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitReportRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    #[validate(range(max = 1000))]
    pub own_score: u32,
    #[validate(range(max = 1000))]
    pub opponent_score: u32,
}

/// POST /api/matches/:id/reports
pub async fn submit_report(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<SubmitReportRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let match_id = path.into_inner();
    info!(
        match_id = %match_id,
        user_id = %req.user_id,
        own_score = req.own_score,
        opponent_score = req.opponent_score,
        "Received score report"
    );

    let outcome = state
        .engine
        .reconciler
        .submit_report(match_id, &req.user_id, req.own_score, req.opponent_score)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// POST /api/matches/:id/reconcile
pub async fn reconcile_match(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let event = state.engine.reconciler.reconcile(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(event))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/matches")
            .route("", web::post().to(create_match))
            .route("/{id}", web::get().to(get_match))
            .route("/{id}/start", web::post().to(start_match))
            .route("/{id}/cancel", web::post().to(cancel_match))
            .route("/{id}/reports", web::post().to(submit_report))
            .route("/{id}/reconcile", web::post().to(reconcile_match)),
    );
}
