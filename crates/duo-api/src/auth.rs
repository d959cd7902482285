use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use duo_db::Database;
use duo_gateway::Dispatcher;
use duo_types::api::{
    AnonymousSignInRequest, Claims, FederatedSignInRequest, SignInResponse, UpdateProfileRequest,
};
use duo_types::models::{DEFAULT_DISPLAY_NAME, IdentityProvider, Room, UserProfile};

use crate::error::ApiError;
use crate::identity::GoogleVerifier;
use crate::storage::ObjectStore;

/// Longest display name a profile may carry, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Lifetime of issued bearer tokens.
const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub store: ObjectStore,
    pub identity: GoogleVerifier,
    pub jwt_secret: String,
    /// Base of download references handed out for stored objects.
    pub public_url: String,
    /// Base of shareable invite links (`{invite_base}/join/{roomId}`).
    pub invite_base: String,
    /// Base of video call URLs (`{call_base}/DuoLove-{roomId}`).
    pub call_base: String,
    pub max_upload_bytes: u64,
}

impl AppStateInner {
    /// Run blocking database work off the async runtime.
    pub async fn with_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }

    /// The room, provided `user_id` is one of its members.
    pub async fn member_room(&self, room_id: Uuid, user_id: Uuid) -> Result<Room, ApiError> {
        let room = self
            .with_db(move |db| db.room_document(&room_id.to_string()))
            .await?
            .ok_or(ApiError::NotFound("room"))?;

        if !room.has_member(user_id) {
            warn!("User {} denied access to room {}", user_id, room_id);
            return Err(ApiError::Forbidden);
        }
        Ok(room)
    }
}

/// POST /auth/anonymous
pub async fn sign_in_anonymous(
    State(state): State<AppState>,
    body: Option<Json<AnonymousSignInRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let display_name = match req.display_name {
        Some(name) => validate_display_name(&name)?,
        None => DEFAULT_DISPLAY_NAME.to_string(),
    };

    let user_id = Uuid::new_v4();
    let profile = upsert_profile(&state, user_id, display_name, String::new(), IdentityProvider::Anonymous)
        .await?;
    let token = create_token(&state.jwt_secret, &profile)?;

    info!("Anonymous sign-in as {}", user_id);
    Ok((StatusCode::CREATED, Json(SignInResponse { user: profile, token })))
}

/// POST /auth/federated: exchange a Google ID token for a bearer token.
pub async fn sign_in_federated(
    State(state): State<AppState>,
    Json(req): Json<FederatedSignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state.identity.verify(&req.id_token).await.map_err(|e| {
        warn!("Federated sign-in rejected: {}", e);
        ApiError::Unauthorized
    })?;

    let user_id = google_user_id(&identity.subject);
    let display_name = identity
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(MAX_DISPLAY_NAME_CHARS).collect())
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

    let profile = upsert_profile(&state, user_id, display_name, identity.email, IdentityProvider::Google)
        .await?;
    let token = create_token(&state.jwt_secret, &profile)?;

    info!("Google sign-in as {}", user_id);
    Ok(Json(SignInResponse { user: profile, token }))
}

/// PATCH /users/me
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let display_name = validate_display_name(&req.display_name)?;
    let uid = claims.sub.to_string();

    let profile = state
        .with_db(move |db| {
            if !db.rename_user(&uid, &display_name)? {
                return Ok(None);
            }
            db.get_user(&uid)?.map(|row| row.into_profile()).transpose()
        })
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(profile))
}

/// Stable id for a Google account, independent of this database.
pub fn google_user_id(subject: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("google:{subject}").as_bytes())
}

pub fn create_token(secret: &str, profile: &UserProfile) -> anyhow::Result<String> {
    let claims = Claims {
        sub: profile.id,
        name: profile.display_name.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn validate_display_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("display name is empty"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ApiError::bad_request(format!(
            "display name longer than {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

async fn upsert_profile(
    state: &AppStateInner,
    user_id: Uuid,
    display_name: String,
    email: String,
    provider: IdentityProvider,
) -> Result<UserProfile, ApiError> {
    let profile = state
        .with_db(move |db| {
            db.upsert_user(&user_id.to_string(), &display_name, &email, provider)?
                .into_profile()
        })
        .await?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_ids_are_stable() {
        assert_eq!(google_user_id("1234"), google_user_id("1234"));
        assert_ne!(google_user_id("1234"), google_user_id("1235"));
    }

    #[test]
    fn display_name_rules() {
        assert_eq!(validate_display_name("  Ana ").unwrap(), "Ana");
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(65)).is_err());
        assert!(validate_display_name(&"é".repeat(64)).is_ok());
    }
}
