pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

pub use middleware::AuthUser;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::accounts::AccountService;
use crate::application::pdf::workflow::PdfWorkflow;
use crate::application::profile::ProfileService;
use crate::application::signatures::SignatureService;
use crate::application::tokens::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub profiles: Arc<ProfileService>,
    pub signatures: Arc<SignatureService>,
    pub pdf: Arc<PdfWorkflow>,
    pub tokens: Arc<TokenService>,
}

pub fn build_router(state: AppState) -> Router {
    let auth_state = state.clone();

    let protected = Router::new()
        .route("/profile/", get(handlers::profile))
        .route("/sign/", post(handlers::sign))
        .route("/start_pdf_task/", post(handlers::start_pdf_task))
        .route("/check_task_status/", post(handlers::check_task_status))
        .route(
            "/check_task_status/{task_id}",
            get(handlers::check_task_status_by_id),
        )
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::require_auth,
        ));

    Router::new()
        .route("/register/", post(handlers::register))
        .route("/login/", post(handlers::login))
        .route("/refresh/", post(handlers::refresh))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}
