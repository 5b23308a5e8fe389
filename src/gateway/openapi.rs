//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// JWT bearer security scheme, signed by the external auth provider.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Duel Arena API",
        version = "1.0.0",
        description = "Real-time head-to-head picture-trivia duels with a server-authoritative credit ledger.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        // Queue
        crate::gateway::handlers::queue::join_queue,
        crate::gateway::handlers::queue::leave_queue,
        crate::gateway::handlers::queue::check_matchmaking,
        // Credits
        crate::gateway::handlers::credits::get_credits,
        crate::gateway::handlers::credits::get_credit_history,
        crate::gateway::handlers::credits::add_credits,
        crate::gateway::handlers::credits::withdraw_credits,
        crate::gateway::handlers::credits::refund_credits,
        // Duel
        crate::gateway::handlers::duel::submit_answer,
        crate::gateway::handlers::duel::start_match,
        crate::gateway::handlers::duel::finalize_match,
        crate::gateway::handlers::duel::get_match,
        crate::gateway::handlers::duel::heartbeat,
        // Admin
        crate::gateway::handlers::admin::populate_questions,
        crate::gateway::handlers::admin::validate_questions,
        crate::gateway::handlers::admin::generate_sequences,
        crate::gateway::handlers::admin::question_stats,
        crate::gateway::handlers::admin::sequence_stats,
        crate::gateway::handlers::admin::pick_sequence,
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Queue", description = "Matchmaking queue"),
        (name = "Credits", description = "Credit ledger"),
        (name = "Duel", description = "Match play"),
        (name = "Admin", description = "Question pool and sequence management"),
    )
)]
pub struct ApiDoc;
