pub mod admin;
pub mod appointments;
pub mod bookings;
pub mod cart;
pub mod extract;
pub mod orders;
pub mod payments;
pub mod products;
pub mod services;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// The full application. `main` and the integration tests build the same router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Catalog
        .route("/api/products/", get(products::list_products))
        .route("/api/products/categories/", get(products::list_categories))
        .route("/api/products/search/", get(products::search_products))
        .route("/api/products/:slug/", get(products::get_product))
        .route("/api/services/", get(services::list_services))
        .route("/api/services/therapists/", get(services::list_therapists))
        .route(
            "/api/services/therapists/:id/availability/",
            get(services::therapist_availability),
        )
        .route("/api/services/:id/", get(services::get_service))
        // Cart
        .route("/api/cart/", get(cart::get_cart))
        .route("/api/cart/add/", post(cart::add_to_cart))
        .route("/api/cart/update/:item_id/", post(cart::update_cart_item))
        .route("/api/cart/remove/:item_id/", post(cart::remove_cart_item))
        .route("/api/cart/clear/", post(cart::clear_cart))
        // Appointments and bookings
        .route(
            "/api/appointments/available-slots/",
            get(appointments::available_slots),
        )
        .route(
            "/api/bookings/",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route("/api/bookings/stats/", get(bookings::booking_stats))
        .route(
            "/api/bookings/therapist/:id/schedule/",
            get(bookings::therapist_schedule),
        )
        .route("/api/bookings/:id/", get(bookings::get_booking))
        .route("/api/bookings/:id/cancel/", post(bookings::cancel_booking))
        .route(
            "/api/bookings/:id/reschedule/",
            post(bookings::reschedule_booking),
        )
        // Orders
        .route("/api/orders/", get(orders::list_orders))
        .route("/api/orders/from-cart/", post(orders::create_from_cart))
        .route("/api/orders/apply-coupon/", post(orders::apply_coupon))
        .route("/api/orders/track/:order_number/", get(orders::track_order))
        .route("/api/orders/:id/", get(orders::get_order))
        .route("/api/orders/:id/cancel/", post(orders::cancel_order))
        // Payments
        .route("/api/payments/", get(payments::list_payments))
        .route("/api/payments/stats/", get(payments::payment_stats))
        .route(
            "/api/payments/initiate/mpesa/",
            post(payments::initiate_mpesa),
        )
        .route("/api/payments/initiate/card/", post(payments::initiate_card))
        .route("/api/payments/webhooks/mpesa/", post(webhook::mpesa_webhook))
        .route("/api/payments/:payment_id/", get(payments::get_payment))
        .route(
            "/api/payments/:payment_id/refund/",
            post(payments::request_refund),
        )
        // Admin
        .route("/api/admin/categories/", post(admin::create_category))
        .route("/api/admin/products/", post(admin::create_product))
        .route(
            "/api/admin/products/:id/variants/",
            post(admin::create_variant),
        )
        .route("/api/admin/services/", post(admin::create_service))
        .route("/api/admin/addons/", post(admin::create_addon))
        .route("/api/admin/therapists/", post(admin::create_therapist))
        .route(
            "/api/admin/therapists/:id/availability/",
            post(admin::create_availability),
        )
        .route("/api/admin/time-slots/", post(admin::create_time_slot))
        .route("/api/admin/coupons/", post(admin::create_coupon))
        .route(
            "/api/admin/bookings/:id/status/",
            post(admin::set_booking_status),
        )
        .route("/api/admin/stats/", get(admin::get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
