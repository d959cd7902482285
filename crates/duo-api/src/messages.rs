use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use duo_types::api::{Claims, SendMessageRequest};
use duo_types::events::Feed;
use duo_types::models::Message;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    state.member_room(room_id, claims.sub).await?;
    let messages = state
        .with_db(move |db| db.message_documents(&room_id.to_string()))
        .await?;
    Ok(Json(messages))
}

/// The sender's current display name is copied onto the message.
pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::bad_request("message is empty"));
    }
    state.member_room(room_id, claims.sub).await?;

    let message_id = Uuid::new_v4();
    let sender_id = claims.sub;
    let fallback_name = claims.name.clone();
    let message = state
        .with_db(move |db| {
            let sid = sender_id.to_string();
            let sender_name = db
                .get_user(&sid)?
                .map(|u| u.display_name)
                .unwrap_or(fallback_name);
            db.insert_message(
                &message_id.to_string(),
                &room_id.to_string(),
                &text,
                &sid,
                &sender_name,
            )?
            .into_message()
        })
        .await?;

    debug!("Message {} in room {}", message.id, room_id);
    state.dispatcher.publish(room_id, Feed::Messages).await;

    Ok((StatusCode::CREATED, Json(message)))
}
