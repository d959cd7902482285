use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::{debug, info};
use uuid::Uuid;

use duo_types::api::Claims;
use duo_types::events::Feed;
use duo_types::models::ChatSettings;

use crate::auth::AppState;
use crate::error::ApiError;

/// GET /rooms/{room_id}/settings
///
/// A room that has never had settings gets the defaults merge-written on
/// this first read. The existence check and the write are separate, so two
/// first readers may both write; the merge makes that harmless.
pub async fn get_settings(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ChatSettings>, ApiError> {
    state.member_room(room_id, claims.sub).await?;

    let existing = state
        .with_db(move |db| db.get_chat_settings(&room_id.to_string()))
        .await?;
    if let Some(settings) = existing {
        return Ok(Json(settings));
    }

    let settings = state
        .with_db(move |db| db.merge_chat_settings(&room_id.to_string(), &ChatSettings::defaults()))
        .await?;
    info!("Wrote default chat settings for room {}", room_id);
    state.dispatcher.publish(room_id, Feed::Settings).await;

    Ok(Json(settings))
}

/// PATCH /rooms/{room_id}/settings: field-level merge of the given fields.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<ChatSettings>,
) -> Result<Json<ChatSettings>, ApiError> {
    patch.validate().map_err(ApiError::BadRequest)?;
    if patch.is_empty() {
        return Err(ApiError::bad_request("no settings fields given"));
    }
    state.member_room(room_id, claims.sub).await?;

    let settings = state
        .with_db(move |db| db.merge_chat_settings(&room_id.to_string(), &patch))
        .await?;
    debug!("Merged chat settings for room {}", room_id);
    state.dispatcher.publish(room_id, Feed::Settings).await;

    Ok(Json(settings))
}
