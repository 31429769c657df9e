use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

/// Storage the server was started with, for health reporting.
#[derive(Clone, Debug)]
pub enum StorageCheck {
    Memory,
    Postgres(PgPool),
}

impl StorageCheck {
    async fn check(&self) -> Result<&'static str, StatusCode> {
        let pool = match self {
            Self::Memory => return Ok("memory"),
            Self::Postgres(pool) => pool,
        };
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = pool.acquire().instrument(acquire_span).await.map_err(|err| {
            error!("Failed to acquire database connection: {}", err);
            StatusCode::SERVICE_UNAVAILABLE
        })?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await.map_err(|err| {
            error!("Failed to ping database: {}", err);
            StatusCode::SERVICE_UNAVAILABLE
        })?;
        Ok("ok")
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Storage is reachable", body = Health),
        (status = 503, description = "Storage is unreachable", body = Health)
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(method: Method, storage: Extension<StorageCheck>) -> impl IntoResponse {
    let result = storage.check().await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: result.map_or_else(|_| "error".to_string(), str::to_string),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(0..7).unwrap_or("");

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    match result {
        Ok(_) => (StatusCode::OK, headers, body),
        Err(status) => (status, headers, body),
    }
}
