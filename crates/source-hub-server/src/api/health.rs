use actix_web::{get, HttpResponse, Responder};

use crate::models::HealthResponse;

/// Basic health check for clients and monitoring.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Source hub is healthy", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}
