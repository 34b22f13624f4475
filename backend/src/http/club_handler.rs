use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::EngineError;
use crate::http::AppState;

/// GET /api/club-league/season
pub async fn season(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.engine.league.current_season_info())
}

/// GET /api/club-league/eligibility/:user_id
pub async fn eligibility(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, EngineError> {
    let user_id = path.into_inner();
    state.engine.league.league_eligibility(&user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "user_id": user_id, "eligible": true })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClubRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

/// POST /api/clubs
pub async fn create_club(
    state: web::Data<AppState>,
    req: web::Json<CreateClubRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let club = state.engine.league.create_club(&req.name).await?;
    Ok(HttpResponse::Created().json(club))
}

/// GET /api/clubs/:id
pub async fn get_club(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, EngineError> {
    let club = state.engine.league.get_club(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(club))
}

#[derive(Debug, Deserialize, Validate)]
pub struct MembershipRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// POST /api/clubs/:id/members
pub async fn join_club(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<MembershipRequest>,
) -> Result<impl Responder, EngineError> {
    req.validate()?;
    let club_id = path.into_inner();
    info!(club_id = %club_id, user_id = %req.user_id, "Received club join request");
    let club = state.engine.league.join_club(&req.user_id, club_id).await?;
    Ok(HttpResponse::Ok().json(club))
}

/// DELETE /api/clubs/members/:user_id
pub async fn leave_club(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, EngineError> {
    let club = state.engine.league.leave_club(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(club))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/club-league")
            .route("/season", web::get().to(season))
            .route("/eligibility/{user_id}", web::get().to(eligibility)),
    )
    .service(
        web::scope("/api/clubs")
            .route("", web::post().to(create_club))
            .route("/members/{user_id}", web::delete().to(leave_club))
            .route("/{id}", web::get().to(get_club))
            .route("/{id}/members", web::post().to(join_club)),
    );
}
