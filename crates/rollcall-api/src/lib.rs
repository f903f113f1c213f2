pub mod admin;
pub mod attendance;
pub mod auth;
pub mod error;
pub mod lessons;
pub mod middleware;
pub mod profile;
pub mod projection;
pub mod qr;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All HTTP routes. Transport layers (CORS, tracing) are added by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/login/", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/me/", get(profile::me))
        .route("/lessons/", get(lessons::list_lessons).post(lessons::create_lesson))
        .route("/lessons/{lesson_id}/details/", get(lessons::lesson_details))
        .route("/lessons/{lesson_id}/qr/", get(lessons::lesson_qr))
        .route("/attendance/mark/", post(attendance::mark_attendance))
        .route("/admin/groups/", get(admin::list_groups).post(admin::create_group))
        .route("/admin/users/", post(admin::create_user))
        .route("/admin/users/{user_id}/", delete(admin::delete_user))
        .route("/admin/users/{user_id}/groups/", put(admin::set_user_groups))
        .route("/admin/lessons/{lesson_id}/", delete(admin::delete_lesson))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
