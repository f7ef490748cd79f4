pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/chats/{chat_id}/resolution-search",
            post(handlers::submit_resolution_search),
        )
        .route(
            "/chats/{chat_id}/turns/{turn_id}/events",
            get(handlers::stream_turn_events),
        )
        .route("/chats/{chat_id}/messages", get(handlers::get_messages))
        .route("/chats/{chat_id}/ui", get(handlers::get_ui_state))
}
