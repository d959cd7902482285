use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use duo_types::api::{Claims, ClearResponse, CommitStrokeRequest, UndoResponse};
use duo_types::events::Feed;
use duo_types::models::{MAX_STROKE_WIDTH, MIN_STROKE_WIDTH, Stroke, is_hex_color};

use crate::auth::AppState;
use crate::error::ApiError;

/// GET /rooms/{room_id}/strokes: oldest first.
pub async fn list_strokes(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Stroke>>, ApiError> {
    state.member_room(room_id, claims.sub).await?;
    let strokes = state
        .with_db(move |db| db.stroke_documents(&room_id.to_string()))
        .await?;
    Ok(Json(strokes))
}

/// POST /rooms/{room_id}/strokes: append one finished stroke.
/// The server clock assigns `createdAt`.
pub async fn commit_stroke(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CommitStrokeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_stroke(&req)?;
    state.member_room(room_id, claims.sub).await?;

    let stroke_id = Uuid::new_v4();
    let points = serde_json::to_string(&req.points).map_err(anyhow::Error::from)?;
    let stroke = state
        .with_db(move |db| {
            db.insert_stroke(
                &stroke_id.to_string(),
                &room_id.to_string(),
                &points,
                &req.color,
                req.width,
            )?
            .into_stroke()
        })
        .await?;

    debug!("Stroke {} ({} points) in room {}", stroke.id, stroke.points.len(), room_id);
    state.dispatcher.publish(room_id, Feed::Strokes).await;

    Ok((StatusCode::CREATED, Json(stroke)))
}

/// POST /rooms/{room_id}/strokes/undo: delete the most recent stroke.
///
/// The lookup and the delete are two separate statements. Two members
/// undoing at once may remove two strokes, or both may target the same one.
pub async fn undo_stroke(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UndoResponse>, ApiError> {
    state.member_room(room_id, claims.sub).await?;

    let latest = state
        .with_db(move |db| db.latest_stroke_id(&room_id.to_string()))
        .await?;

    let Some(stroke_id) = latest else {
        return Ok(Json(UndoResponse { removed: None }));
    };

    let target = stroke_id.clone();
    state
        .with_db(move |db| db.delete_stroke(&room_id.to_string(), &target))
        .await?;
    state.dispatcher.publish(room_id, Feed::Strokes).await;

    let removed = stroke_id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt stroke id '{}': {}", stroke_id, e))?;
    Ok(Json(UndoResponse {
        removed: Some(removed),
    }))
}

/// POST /rooms/{room_id}/clear: drop every stroke and the canvas background.
pub async fn clear_canvas(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ClearResponse>, ApiError> {
    state.member_room(room_id, claims.sub).await?;

    let removed = state
        .with_db(move |db| db.clear_canvas(&room_id.to_string()))
        .await?;
    state
        .dispatcher
        .publish_many(room_id, &[Feed::Strokes, Feed::Room])
        .await;

    info!("{} ({}) cleared room {} ({} strokes)", claims.name, claims.sub, room_id, removed);
    Ok(Json(ClearResponse { removed }))
}

fn validate_stroke(req: &CommitStrokeRequest) -> Result<(), ApiError> {
    if req.points.is_empty() {
        return Err(ApiError::bad_request("stroke has no points"));
    }
    if req.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ApiError::bad_request("stroke has a non-finite point"));
    }
    if !is_hex_color(&req.color) {
        return Err(ApiError::bad_request(format!("'{}' is not a hex color", req.color)));
    }
    if !(MIN_STROKE_WIDTH..=MAX_STROKE_WIDTH).contains(&req.width) {
        return Err(ApiError::bad_request(format!(
            "width {} outside {}..={}",
            req.width, MIN_STROKE_WIDTH, MAX_STROKE_WIDTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duo_types::models::Point;

    fn request(points: Vec<Point>, color: &str, width: f64) -> CommitStrokeRequest {
        CommitStrokeRequest {
            points,
            color: color.into(),
            width,
        }
    }

    #[test]
    fn stroke_validation() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)];
        assert!(validate_stroke(&request(pts.clone(), "#FF69B4", 4.0)).is_ok());
        assert!(validate_stroke(&request(vec![], "#FF69B4", 4.0)).is_err());
        assert!(validate_stroke(&request(pts.clone(), "red", 4.0)).is_err());
        assert!(validate_stroke(&request(pts.clone(), "#000", 0.5)).is_err());
        assert!(validate_stroke(&request(pts, "#000", 21.0)).is_err());
        assert!(validate_stroke(&request(vec![Point::new(f64::NAN, 0.0)], "#000", 4.0)).is_err());
    }
}
