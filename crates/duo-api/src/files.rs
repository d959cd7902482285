use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use duo_types::api::{
    BeginUploadRequest, Claims, ChunkQuery, CompleteUploadRequest, CompleteUploadResponse,
    UploadStatus,
};
use duo_types::events::Feed;
use duo_types::models::{ChatSettings, UploadTarget};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;
use crate::storage::{AppendOutcome, CompleteOutcome};

/// Hex digits of the content hash appended to download references.
const VERSION_TAG_LEN: usize = 12;

/// An upload session owned by the caller.
struct OwnedUpload {
    id: Uuid,
    room_id: Uuid,
    target: UploadTarget,
}

/// POST /rooms/{room_id}/uploads: open a resumable upload session.
pub async fn begin_upload(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BeginUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.member_room(room_id, claims.sub).await?;

    let upload_id = Uuid::new_v4();
    let uid = claims.sub.to_string();
    let target = req.target;
    state
        .with_db(move |db| {
            db.create_upload(&upload_id.to_string(), &room_id.to_string(), &uid, target)
        })
        .await?;
    state.store.begin(&upload_id.to_string()).await?;

    info!("Upload {} ({}) started in room {}", upload_id, target.as_str(), room_id);
    Ok((
        StatusCode::CREATED,
        Json(UploadStatus {
            upload_id,
            target,
            received: 0,
        }),
    ))
}

/// GET /uploads/{upload_id}: how many bytes the server holds.
pub async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UploadStatus>, ApiError> {
    let upload = owned_upload(&state, upload_id, claims.sub).await?;
    let received = state
        .store
        .received(&upload_id.to_string())
        .await?
        .ok_or(ApiError::NotFound("upload"))?;

    Ok(Json(UploadStatus {
        upload_id,
        target: upload.target,
        received,
    }))
}

/// PUT /uploads/{upload_id}?offset=N: append one chunk.
///
/// `offset` must equal the bytes already received; otherwise the request is
/// a conflict carrying the current count so the client can resume.
pub async fn put_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
    Query(query): Query<ChunkQuery>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<UploadStatus>, ApiError> {
    let upload = owned_upload(&state, upload_id, claims.sub).await?;

    let outcome = state
        .store
        .append(&upload_id.to_string(), query.offset, &body, state.max_upload_bytes)
        .await?;

    match outcome {
        AppendOutcome::Appended(received) => Ok(Json(UploadStatus {
            upload_id,
            target: upload.target,
            received,
        })),
        AppendOutcome::OffsetMismatch(received) => {
            warn!(
                "Upload {} chunk at offset {} but {} bytes received",
                upload_id, query.offset, received
            );
            Err(ApiError::OffsetConflict { received })
        }
        AppendOutcome::TooLarge => Err(ApiError::PayloadTooLarge {
            limit: state.max_upload_bytes,
        }),
    }
}

/// POST /uploads/{upload_id}/complete: verify, store, and apply the object.
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>, ApiError> {
    let upload = owned_upload(&state, upload_id, claims.sub).await?;
    let id = upload_id.to_string();
    let key = upload.target.object_key(upload.room_id);

    let digest = match state.store.complete(&id, &key, &req.sha256).await? {
        CompleteOutcome::Stored { digest } => digest,
        CompleteOutcome::HashMismatch { digest } => {
            warn!("Upload {} hash mismatch (got {})", upload_id, digest);
            return Err(ApiError::bad_request("sha256 does not match uploaded bytes"));
        }
        CompleteOutcome::Empty => return Err(ApiError::bad_request("upload is empty")),
        CompleteOutcome::Missing => return Err(ApiError::NotFound("upload")),
    };

    let url = format!(
        "{}/objects/{}?v={}",
        state.public_url.trim_end_matches('/'),
        key,
        &digest[..VERSION_TAG_LEN]
    );
    apply_background(&state, &upload, url.clone()).await?;

    state.with_db(move |db| db.delete_upload(&id)).await?;

    info!("Upload {} completed as {}", upload_id, key);
    Ok(Json(CompleteUploadResponse { url }))
}

/// GET /objects/rooms/{room_id}/{name}: public download by key.
pub async fn download_object(
    State(state): State<AppState>,
    Path((room_id, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let target = UploadTarget::from_object_name(&name).ok_or(ApiError::NotFound("object"))?;
    let key = target.object_key(room_id);

    let (file, len) = state
        .store
        .open(&key)
        .await?
        .ok_or(ApiError::NotFound("object"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000".to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

async fn owned_upload(
    state: &AppStateInner,
    upload_id: Uuid,
    user_id: Uuid,
) -> Result<OwnedUpload, ApiError> {
    let row = state
        .with_db(move |db| db.get_upload(&upload_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("upload"))?;

    if row.uploader_id != user_id.to_string() {
        return Err(ApiError::Forbidden);
    }

    Ok(OwnedUpload {
        id: upload_id,
        target: row.target()?,
        room_id: row
            .room_id
            .parse()
            .map_err(|e| anyhow::anyhow!("corrupt room id on upload {}: {}", upload_id, e))?,
    })
}

/// Point the room at its new background and notify subscribers.
async fn apply_background(
    state: &AppStateInner,
    upload: &OwnedUpload,
    url: String,
) -> Result<(), ApiError> {
    let room_id = upload.room_id;
    match upload.target {
        UploadTarget::ChatBackground => {
            let patch = ChatSettings {
                background_url: Some(url),
                ..Default::default()
            };
            state
                .with_db(move |db| db.merge_chat_settings(&room_id.to_string(), &patch))
                .await?;
            state.dispatcher.publish(room_id, Feed::Settings).await;
        }
        UploadTarget::CanvasBackground => {
            state
                .with_db(move |db| db.set_room_background(&room_id.to_string(), Some(&url)))
                .await?;
            state.dispatcher.publish(room_id, Feed::Room).await;
        }
    }
    info!("Upload {} applied as {} of room {}", upload.id, upload.target.as_str(), room_id);
    Ok(())
}
