use crate::{
    clock::{Clock, SystemClock},
    email::{EmailConfig, EmailDispatcher},
    registry::{MemoryAccountRegistry, PgAccountRegistry},
    rewards::{MemoryRewardLedger, PgRewardLedger},
    service::{AuthConfig, Backends, Secrets, Services},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::options,
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod handlers;
pub mod limit;
pub mod session;
pub mod types;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use handlers::health::StorageCheck;
pub use openapi::openapi;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Where accounts and reward ledgers live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Process-local maps, lost on restart.
    Memory,
    Postgres { dsn: String },
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    storage: Storage,
    auth_config: AuthConfig,
    email_config: EmailConfig,
    secrets: Secrets,
) -> Result<()> {
    let dispatcher = email_config.dispatcher()?;
    let (backends, storage_check) = connect(storage, dispatcher).await?;

    let services = Services::build(auth_config, backends, secrets)?;
    services
        .rewards
        .seed_default_prizes()
        .await
        .context("Failed to seed default prizes")?;

    let app = app(services.clone(), storage_check)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    // Let acknowledged code requests finish sending.
    services.auth.settle().await;

    Ok(())
}

/// Open the configured storage and pair it with a dispatcher and the system clock.
///
/// # Errors
/// Returns an error if the database is unreachable or the schema cannot be applied.
pub async fn connect(
    storage: Storage,
    dispatcher: Arc<dyn EmailDispatcher>,
) -> Result<(Backends, StorageCheck)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match storage {
        Storage::Memory => {
            info!("Using in-memory storage, data is lost on restart");
            Ok((
                Backends {
                    registry: Arc::new(MemoryAccountRegistry::with_clock(Arc::clone(&clock))),
                    ledger: Arc::new(MemoryRewardLedger::new()),
                    dispatcher,
                    clock,
                },
                StorageCheck::Memory,
            ))
        }
        Storage::Postgres { dsn } => {
            // Connect to database
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(&dsn)
                .await
                .context("Failed to connect to database")?;

            sqlx::raw_sql(SCHEMA)
                .execute(&pool)
                .await
                .context("Failed to apply database schema")?;

            Ok((
                Backends {
                    registry: Arc::new(PgAccountRegistry::new(pool.clone())),
                    ledger: Arc::new(PgRewardLedger::new(pool.clone())),
                    dispatcher,
                    clock,
                },
                StorageCheck::Postgres(pool),
            ))
        }
    }
}

/// Assemble routes, docs and middleware around a set of services.
///
/// # Errors
/// Returns an error if the configured frontend URL has no usable origin.
pub fn app(services: Services, storage_check: StorageCheck) -> Result<Router> {
    let frontend_origin = frontend_origin(services.auth.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);
    let limits = limit::RequestLimits::new(services.auth.config(), &services.clock);

    // swagger-ui serves the document built from the same router.
    let (router, openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(handlers::health::health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(middleware::from_fn_with_state(limits, limit::enforce))
                .layer(Extension(services))
                .layer(Extension(storage_check)),
        );

    Ok(app)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
