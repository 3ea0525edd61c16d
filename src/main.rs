mod config;
mod db;
mod engine;
mod models;
mod responses;
mod routes;
mod services;
mod state;
mod utils;
mod worker;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use config::Config;
use db::postgres_attendance_repository::PostgresAttendanceRepository;
use db::postgres_session_repository::PostgresSessionRepository;
use db::postgres_subscription_repository::PostgresSubscriptionRepository;
use responses::JsonResponse;
use services::meetings::HttpMeetingProvider;
use services::notifier::HttpNotifier;
use services::payment::HttpPaymentGateway;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Arc::new(Config::from_env());

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec), with room for webhook bursts
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(50);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to clean up the rate limiter's per-IP map
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let pg_pool = establish_connection(&config.database_url).await;

    let state = AppState {
        sessions: Arc::new(PostgresSessionRepository {
            pool: pg_pool.clone(),
        }),
        subscriptions: Arc::new(PostgresSubscriptionRepository {
            pool: pg_pool.clone(),
        }),
        attendance: Arc::new(PostgresAttendanceRepository {
            pool: pg_pool.clone(),
        }),
        gateway: Arc::new(
            HttpPaymentGateway::new(&config.payment_gateway_url, &config.payment_gateway_key)
                .expect("Failed to initialize payment gateway client"),
        ),
        notifier: Arc::new(
            HttpNotifier::new(&config.notifier_url, &config.notifier_key)
                .expect("Failed to initialize notifier client"),
        ),
        meetings: Arc::new(
            HttpMeetingProvider::new(&config.meeting_provider_url, &config.meeting_provider_key)
                .expect("Failed to initialize meeting provider client"),
        ),
        config: config.clone(),
    };
    let state_for_worker = state.clone();

    let cors = CorsLayer::new()
        .allow_origin(config.allowed_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = routes::api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    worker::start_background_workers(state_for_worker).await;

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Listening on http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// Establish a connection to the database, verify it, and apply pending
/// migrations.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    info!("Connected to the database");
    pool
}
