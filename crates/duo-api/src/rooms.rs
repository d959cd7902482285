use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use duo_db::JoinOutcome;
use duo_types::api::{Claims, JoinRoomRequest, RoomResponse, StartCallResponse};
use duo_types::events::Feed;
use duo_types::models::{Room, UserProfile};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

/// POST /rooms: new room with the caller as its only member.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = Uuid::new_v4();
    let uid = claims.sub.to_string();

    let room = state
        .with_db(move |db| {
            db.create_room(&room_id.to_string(), &uid)?.into_room()
        })
        .await?;

    info!("{} ({}) created room {}", claims.name, claims.sub, room_id);
    Ok((StatusCode::CREATED, Json(room_response(&state, room))))
}

/// POST /rooms/join: add the caller to the room named by a join code.
pub async fn join_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<RoomResponse>, ApiError> {
    let code = req.code.trim();
    if code.is_empty() {
        return Err(ApiError::bad_request("join code is empty"));
    }
    let room_id: Uuid = code.parse().map_err(|_| ApiError::NotFound("room"))?;
    let uid = claims.sub.to_string();

    let (outcome, room) = state
        .with_db(move |db| {
            let rid = room_id.to_string();
            let outcome = db.add_member(&rid, &uid)?;
            Ok((outcome, db.room_document(&rid)?))
        })
        .await?;

    let room = match (outcome, room) {
        (JoinOutcome::RoomNotFound, _) | (_, None) => return Err(ApiError::NotFound("room")),
        (_, Some(room)) => room,
    };

    if outcome == JoinOutcome::Joined {
        info!("{} ({}) joined room {}", claims.name, claims.sub, room_id);
        state.dispatcher.publish(room_id, Feed::Room).await;
    }

    Ok(Json(room_response(&state, room)))
}

/// GET /rooms/mine: the room whose members include the caller.
pub async fn my_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RoomResponse>, ApiError> {
    let uid = claims.sub.to_string();
    let room = state
        .with_db(move |db| {
            db.find_room_for_member(&uid)?
                .map(|row| row.into_room())
                .transpose()
        })
        .await?
        .ok_or(ApiError::NotFound("room"))?;

    Ok(Json(room_response(&state, room)))
}

/// GET /rooms/{room_id}
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RoomResponse>, ApiError> {
    let room = state.member_room(room_id, claims.sub).await?;
    Ok(Json(room_response(&state, room)))
}

/// GET /rooms/{room_id}/members
pub async fn list_members(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    state.member_room(room_id, claims.sub).await?;

    let members = state
        .with_db(move |db| {
            db.list_members(&room_id.to_string())?
                .into_iter()
                .map(|row| row.into_profile())
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;

    Ok(Json(members))
}

/// POST /rooms/{room_id}/call: record and return the room's call link.
pub async fn start_call(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StartCallResponse>, ApiError> {
    state.member_room(room_id, claims.sub).await?;

    let url = call_url(&state.call_base, room_id);
    let stored = url.clone();
    state
        .with_db(move |db| db.set_active_call(&room_id.to_string(), &stored))
        .await?;
    state.dispatcher.publish(room_id, Feed::Room).await;

    info!("{} ({}) started call in room {}", claims.name, claims.sub, room_id);
    Ok(Json(StartCallResponse { url }))
}

fn room_response(state: &AppStateInner, room: Room) -> RoomResponse {
    RoomResponse {
        invite_code: room.id.to_string(),
        invite_link: invite_link(&state.invite_base, room.id),
        room,
    }
}

fn invite_link(base: &str, room_id: Uuid) -> String {
    format!("{}/join/{}", base.trim_end_matches('/'), room_id)
}

fn call_url(base: &str, room_id: Uuid) -> String {
    format!("{}/DuoLove-{}", base.trim_end_matches('/'), room_id)
}
