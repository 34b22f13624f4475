pub mod challenge_handler;
pub mod club_handler;
pub mod health;
pub mod match_handler;
pub mod player_handler;

use actix_web::web;
use std::sync::Arc;

use crate::db::DbPool;
use crate::service::Engine;

/// Shared state handed to every handler.
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Absent when running over the in-memory store.
    pub pool: Option<DbPool>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/health", web::get().to(health::health_check));
    match_handler::configure_routes(cfg);
    challenge_handler::configure_routes(cfg);
    club_handler::configure_routes(cfg);
    player_handler::configure_routes(cfg);
}
