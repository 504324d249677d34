use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{checkin, events, health_check, promos, purchases, waitlist, AppState};

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(events::create_event))
        .route("/events/:id", get(events::get_event))
        .route("/events/:id/publish", post(events::publish_event))
        .route("/events/:id/capacity", patch(events::change_capacity))
        .route("/events/:id/purchase", post(purchases::purchase))
        .route("/payments/confirm", post(purchases::confirm_payment))
        .route("/tickets/:id/cancel", post(purchases::cancel_ticket))
        .route(
            "/events/:id/waitlist",
            post(waitlist::join)
                .delete(waitlist::leave)
                .get(waitlist::status),
        )
        .route("/checkin", post(checkin::check_in))
        .route("/promos", post(promos::create_promo))
        .route("/promos/:id/deactivate", post(promos::deactivate_promo))
        .route("/promos/validate", post(promos::validate_promo))
        .layer(create_security_headers_layer())
        .layer(create_cors_layer())
        .with_state(state)
}
