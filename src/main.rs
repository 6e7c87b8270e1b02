//! Serena Backend Server
//!
//! Booking-slot allocation and subsidized payment settlement for the Serena
//! therapy marketplace. Serves the mutating API surfaces (bookings, session
//! lifecycle, gateway webhooks) and runs the auto-completion sweep.

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpResponse, HttpServer};
use serena_api::{configure_bookings, configure_sessions, configure_webhooks, Settlement};
use serena_core::AppConfig;
use serena_db::{
    create_pool, PgPaymentRepository, PgProcessedEventRepository, PgSessionRepository,
};
use serena_gateway::{HttpPaymentGateway, RetryConfig, RetryExecutor};
use serena_services::{AutoCompletionScheduler, SlotAllocator, SubsidyLedger};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "serena-backend",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .configure(configure_bookings)
            .configure(configure_sessions)
            .configure(configure_webhooks),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "serena_backend={},serena_api={},serena_services={},serena_db={},serena_gateway={},actix_web=info,sqlx=warn",
            log_level, log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Serena backend v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().unwrap_or_else(|e| {
        panic!("Failed to load configuration: {}", e);
    });

    let pool = create_pool(
        &config.database.url,
        Some(config.database.max_connections),
    )
    .await
    .unwrap_or_else(|e| panic!("Failed to connect to database: {}", e));

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .unwrap_or_else(|e| panic!("Failed to run migrations: {}", e));

    let pool = Arc::new(pool);

    // Gateway client and retry strategy shared by every gateway call site
    let gateway = Arc::new(
        HttpPaymentGateway::new(
            &config.gateway.base_url,
            &config.gateway.secret_key,
            config.gateway.timeout_ms,
        )
        .unwrap_or_else(|e| panic!("Failed to build gateway client: {}", e)),
    );
    let retry = RetryExecutor::new(RetryConfig::from(&config.retry));

    // Repositories
    let sessions = Arc::new(PgSessionRepository::new((*pool).clone()));
    let payments = Arc::new(PgPaymentRepository::new((*pool).clone()));
    let events = Arc::new(PgProcessedEventRepository::new((*pool).clone()));

    // Services
    let allocator = web::Data::new(SlotAllocator::new(Arc::clone(&pool)));
    let ledger = web::Data::new(SubsidyLedger::new(Arc::clone(&pool)));
    let settlement: web::Data<Settlement> = web::Data::new(Settlement::new(
        Arc::clone(&pool),
        Arc::clone(&gateway),
        Arc::clone(&sessions),
        Arc::clone(&payments),
        Arc::clone(&events),
        retry,
        config.settlement.payout_rate_bps,
    ));

    // Background auto-completion sweep
    let scheduler = Arc::new(AutoCompletionScheduler::new(
        settlement.clone().into_inner(),
        Arc::clone(&sessions),
        &config.settlement,
    ));
    tokio::spawn(Arc::clone(&scheduler).run());

    let bind_addr = config.server_addr();
    let workers = config.server.workers.max(1);
    info!("Listening on {} with {} workers", bind_addr, workers);

    let config_data = web::Data::new(config);
    let pool_data = web::Data::new((*pool).clone());
    let sessions_data = web::Data::from(Arc::clone(&sessions));

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(cors)
            .app_data(config_data.clone())
            .app_data(pool_data.clone())
            .app_data(sessions_data.clone())
            .app_data(allocator.clone())
            .app_data(ledger.clone())
            .app_data(settlement.clone())
            .configure(configure_routes)
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await
}
