use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};

use duo_gateway::connection;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{canvas, files, messages, rooms, settings};

/// Headroom over the object size limit for a single chunk request.
const CHUNK_BODY_SLACK: usize = 64 * 1024;

/// Every REST route, the gateway upgrade, and the health check.
pub fn router(state: AppState) -> Router {
    let chunk_limit = usize::try_from(state.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(CHUNK_BODY_SLACK);

    let public_routes = Router::new()
        .route("/auth/anonymous", post(auth::sign_in_anonymous))
        .route("/auth/federated", post(auth::sign_in_federated))
        .route("/objects/rooms/{room_id}/{name}", get(files::download_object))
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/users/me", patch(auth::update_profile))
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/join", post(rooms::join_room))
        .route("/rooms/mine", get(rooms::my_room))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route("/rooms/{room_id}/members", get(rooms::list_members))
        .route("/rooms/{room_id}/call", post(rooms::start_call))
        .route(
            "/rooms/{room_id}/strokes",
            get(canvas::list_strokes).post(canvas::commit_stroke),
        )
        .route("/rooms/{room_id}/strokes/undo", post(canvas::undo_stroke))
        .route("/rooms/{room_id}/clear", post(canvas::clear_canvas))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/rooms/{room_id}/settings",
            get(settings::get_settings).patch(settings::update_settings),
        )
        .route("/rooms/{room_id}/uploads", post(files::begin_upload))
        .route(
            "/uploads/{upload_id}",
            get(files::upload_status)
                .put(files::put_chunk)
                .layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route("/uploads/{upload_id}/complete", post(files::complete_upload))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, jwt_secret))
}

pub async fn health() -> &'static str {
    "ok"
}
