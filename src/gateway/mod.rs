//! HTTP gateway: routing, auth layering, OpenAPI.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::user_auth::jwt_auth_middleware;
use state::AppState;

/// Assemble the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // ==========================================================================
    // Player routes - protected by JWT
    // ==========================================================================
    let duel_routes = Router::new()
        .route("/queue/join", post(handlers::queue::join_queue))
        .route("/queue/leave", post(handlers::queue::leave_queue))
        .route("/queue/check", post(handlers::queue::check_matchmaking))
        .route("/credits", get(handlers::credits::get_credits))
        .route("/credits/history", get(handlers::credits::get_credit_history))
        .route("/credits/add", post(handlers::credits::add_credits))
        .route("/credits/withdraw", post(handlers::credits::withdraw_credits))
        .route("/credits/refund", post(handlers::credits::refund_credits))
        .route("/matches/answer", post(handlers::duel::submit_answer))
        .route("/matches/{match_id}", get(handlers::duel::get_match))
        .route("/matches/{match_id}/start", post(handlers::duel::start_match))
        .route(
            "/matches/{match_id}/finalize",
            post(handlers::duel::finalize_match),
        )
        .route("/presence/heartbeat", post(handlers::duel::heartbeat))
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    // ==========================================================================
    // Admin routes - protected by JWT
    // ==========================================================================
    let admin_routes = Router::new()
        .route(
            "/duel/questions/populate",
            post(handlers::admin::populate_questions),
        )
        .route(
            "/duel/questions/validate",
            post(handlers::admin::validate_questions),
        )
        .route("/duel/questions/stats", get(handlers::admin::question_stats))
        .route(
            "/duel/sequences/generate",
            post(handlers::admin::generate_sequences),
        )
        .route("/duel/sequences/stats", get(handlers::admin::sequence_stats))
        .route("/duel/sequences/pick", get(handlers::admin::pick_sequence))
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    // ==========================================================================
    // Public routes
    // ==========================================================================
    let app = Router::new()
        // Real-time subscription surface (token auth via query parameter)
        .route("/ws/duel", get(handlers::stream::ws_duel))
        // Health check
        .route("/health", get(handlers::health_check))
        // API routes
        .nest("/api/v1/duel", duel_routes)
        .nest("/api/v1/admin", admin_routes);

    // [SECURITY] Mock API routes - only compiled when 'mock-api' feature is
    // enabled. Production builds MUST be compiled with `--no-default-features`
    // to exclude this.
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route("/token", post(handlers::dev::issue_dev_token)),
    );

    app.with_state(state)
        // OpenAPI / Swagger UI (stateless, added after with_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Start the HTTP gateway server.
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) {
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind gateway port");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "gateway listening");
    tracing::info!("websocket endpoint: ws://{addr}/ws/duel");
    tracing::info!("api docs: http://{addr}/docs");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
