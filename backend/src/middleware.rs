use actix_cors::Cors;
use actix_web::http::{header, Method};

/// CORS for the admin dashboard. Pinned to `origin` when configured.
pub fn cors_middleware(origin: Option<&str>) -> Cors {
    let cors = match origin {
        Some(origin) => Cors::default().allowed_origin(origin),
        None => Cors::default().allow_any_origin(),
    };
    cors.allowed_methods([Method::GET, Method::POST, Method::DELETE])
        .allowed_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600)
}
