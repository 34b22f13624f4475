use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::EngineError;
use crate::http::AppState;
use crate::models::CreateChallengeRequest;

/// POST /api/challenges
pub async fn create_challenge(
    state: web::Data<AppState>,
    req: web::Json<CreateChallengeRequest>,
) -> Result<impl Responder, EngineError> {
    info!(name = %req.name, lives = req.lives, wins_required = req.wins_required, "Received create challenge request");
    let challenge = state.engine.challenges.create_challenge(req.into_inner()).await?;
    Ok(HttpResponse::Created().json(challenge))
}

/// GET /api/challenges/:id
pub async fn get_challenge(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let challenge = state.engine.challenges.get_challenge(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(challenge))
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// POST /api/challenges/:id/{start|pause|resume|end}
pub async fn transition_challenge(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
) -> Result<impl Responder, EngineError> {
    let (id, action) = path.into_inner();
    info!(challenge_id = %id, action = %action, "Received challenge transition");

    let challenges = &state.engine.challenges;
    let challenge = match action.as_str() {
        "start" => challenges.start_challenge(id).await?,
        "pause" => challenges.pause_challenge(id).await?,
        "resume" => challenges.resume_challenge(id).await?,
        "end" => challenges.end_challenge(id).await?,
        other => return Err(EngineError::Validation(format!("unknown action '{}'", other))),
    };
    Ok(HttpResponse::Ok().json(challenge))
}

#[derive(Debug, Deserialize, Validate)]
pub struct JoinChallengeRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// POST /api/challenges/:id/join
pub async fn join_challenge(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<JoinChallengeRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let participant = state
        .engine
        .challenges
        .join_challenge(&req.user_id, path.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(participant))
}

// =============================================================================
// HYPERCHARGE & EXTENSION
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct HyperchargeRequest {
    pub multiplier_percent: u32,
    #[validate(length(min = 2, max = 16))]
    pub duration: String,
}

/// POST /api/challenges/:id/hypercharge
pub async fn apply_hypercharge(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<HyperchargeRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let challenge = state
        .engine
        .challenges
        .apply_hypercharge(path.into_inner(), req.multiplier_percent, &req.duration)
        .await?;
    Ok(HttpResponse::Ok().json(challenge))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExtendRequest {
    #[validate(length(min = 2, max = 16))]
    pub duration: String,
}

/// POST /api/challenges/:id/extend
pub async fn extend_challenge(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ExtendRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let challenge = state
        .engine
        .challenges
        .extend_challenge(path.into_inner(), &req.duration)
        .await?;
    Ok(HttpResponse::Ok().json(challenge))
}

// =============================================================================
// VIEWS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub page: Option<usize>,
}

/// GET /api/challenges/:id/leaderboard?page=
pub async fn leaderboard(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<LeaderboardQuery>,
) -> Result<impl Responder, EngineError> {
    let page = state
        .engine
        .challenges
        .generate_leaderboard(path.into_inner(), query.page.unwrap_or(1))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /api/challenges/:id/stats
pub async fn stats(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let stats = state
        .engine
        .challenges
        .calculate_challenge_stats(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(stats))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/challenges")
            .route("", web::post().to(create_challenge))
            .route("/{id}", web::get().to(get_challenge))
            .route("/{id}/join", web::post().to(join_challenge))
            .route("/{id}/hypercharge", web::post().to(apply_hypercharge))
            .route("/{id}/extend", web::post().to(extend_challenge))
            .route("/{id}/leaderboard", web::get().to(leaderboard))
            .route("/{id}/stats", web::get().to(stats))
            .route("/{id}/{action}", web::post().to(transition_challenge)),
    );
}
