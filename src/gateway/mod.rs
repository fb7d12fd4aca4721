pub mod handlers;
pub mod state;
pub mod types;

mod integration_tests;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use state::AppState;

/// Build the gateway router.
///
/// Every route except health, offering reads and the payment webhook needs
/// the caller identity header (see [`state::USER_HEADER`]).
pub fn router(state: Arc<AppState>) -> Router {
    let offering_routes = Router::new()
        .route(
            "/",
            get(handlers::offering::list_offerings).post(handlers::offering::register_offering),
        )
        .route("/{offering_id}", get(handlers::offering::get_offering))
        .route(
            "/{offering_id}/availability",
            get(handlers::offering::get_availability),
        );

    let investment_routes = Router::new()
        .route(
            "/",
            get(handlers::investment::list_investments)
                .post(handlers::investment::place_investment),
        )
        .route(
            "/{investment_id}",
            get(handlers::investment::get_investment),
        )
        .route(
            "/{investment_id}/confirm",
            post(handlers::investment::confirm_payment),
        )
        .route(
            "/{investment_id}/cancel",
            post(handlers::investment::cancel_investment),
        )
        .route(
            "/{investment_id}/refund",
            post(handlers::investment::refund_investment),
        );

    let distribution_routes = Router::new()
        .route("/", post(handlers::distribution::create_distribution))
        .route(
            "/{distribution_id}",
            get(handlers::distribution::get_distribution),
        )
        .route(
            "/{distribution_id}/process",
            post(handlers::distribution::process_payments),
        )
        .route(
            "/{distribution_id}/retry",
            post(handlers::distribution::retry_failed),
        )
        .route(
            "/{distribution_id}/payments",
            get(handlers::distribution::get_payments),
        )
        .route(
            "/{distribution_id}/abandon",
            post(handlers::distribution::abandon_distribution),
        );

    let approval_routes = Router::new()
        .route("/withdrawals", post(handlers::approval::submit_withdrawal))
        .route("/proposals", post(handlers::approval::submit_proposal))
        .route("/{approval_id}", get(handlers::approval::get_approval))
        .route("/{approval_id}/approve", post(handlers::approval::approve))
        .route("/{approval_id}/reject", post(handlers::approval::reject))
        .route("/{approval_id}/vote", post(handlers::approval::cast_vote))
        .route("/{approval_id}/finalize", post(handlers::approval::finalize))
        .route(
            "/{approval_id}/execute",
            post(handlers::approval::retry_execution),
        );

    Router::new()
        .route("/api/v1/health", get(handlers::health::health_check))
        .route("/api/v1/holdings", get(handlers::investment::list_holdings))
        .route(
            "/api/v1/webhooks/payment",
            post(handlers::webhook::payment_webhook),
        )
        .nest("/api/v1/offerings", offering_routes)
        .nest("/api/v1/investments", investment_routes)
        .nest("/api/v1/distributions", distribution_routes)
        .nest("/api/v1/approvals", approval_routes)
        .with_state(state)
}

/// Bind and serve the gateway until the listener fails
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "failed to bind {}: {} (port {} may already be in use)",
            addr,
            e,
            port
        )
    })?;

    info!(addr = %addr, "Gateway listening");
    info!("Offerings:     /api/v1/offerings/*");
    info!("Investments:   /api/v1/investments/*");
    info!("Distributions: /api/v1/distributions/*");
    info!("Approvals:     /api/v1/approvals/*");

    axum::serve(listener, app).await?;
    Ok(())
}
