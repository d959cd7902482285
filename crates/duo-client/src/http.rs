use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use duo_types::api::{
    AnonymousSignInRequest, BeginUploadRequest, ClearResponse, CommitStrokeRequest,
    CompleteUploadRequest, CompleteUploadResponse, ErrorBody, FederatedSignInRequest,
    JoinRoomRequest, RoomResponse, SendMessageRequest, SignInResponse, StartCallResponse,
    UndoResponse, UpdateProfileRequest, UploadStatus,
};
use duo_types::models::{ChatSettings, Message, Stroke, UploadTarget, UserProfile};

use crate::error::{ClientError, Result};

/// Bytes sent per upload request.
pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Offset conflicts tolerated before an upload gives up.
const MAX_UPLOAD_RESYNCS: u32 = 3;

/// REST client for one Duo server. Holds the bearer token once signed in.
#[derive(Clone)]
pub struct DuoClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl DuoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut client = Self::new(base_url);
        client.token = Some(token.into());
        client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// WebSocket URL of the gateway on the same server.
    pub fn gateway_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/gateway")
    }

    // -- Identity --

    pub async fn sign_in_anonymous(&mut self, display_name: Option<&str>) -> Result<UserProfile> {
        let body = AnonymousSignInRequest {
            display_name: display_name.map(str::to_string),
        };
        let resp: SignInResponse = self
            .send(self.http.post(self.url("/auth/anonymous")).json(&body))
            .await?;
        self.token = Some(resp.token);
        Ok(resp.user)
    }

    pub async fn sign_in_federated(&mut self, id_token: &str) -> Result<UserProfile> {
        let body = FederatedSignInRequest {
            id_token: id_token.to_string(),
        };
        let resp: SignInResponse = self
            .send(self.http.post(self.url("/auth/federated")).json(&body))
            .await?;
        self.token = Some(resp.token);
        Ok(resp.user)
    }

    pub async fn update_display_name(&self, display_name: &str) -> Result<UserProfile> {
        let body = UpdateProfileRequest {
            display_name: display_name.to_string(),
        };
        self.json(Method::PATCH, "/users/me", &body).await
    }

    // -- Rooms --

    pub async fn create_room(&self) -> Result<RoomResponse> {
        self.send(self.authed(Method::POST, "/rooms")?).await
    }

    pub async fn join_room(&self, code: &str) -> Result<RoomResponse> {
        let body = JoinRoomRequest {
            code: code.to_string(),
        };
        self.json(Method::POST, "/rooms/join", &body).await
    }

    /// The caller's room, or `None` when the server has none for them.
    pub async fn my_room(&self) -> Result<Option<RoomResponse>> {
        match self.send(self.authed(Method::GET, "/rooms/mine")?).await {
            Ok(room) => Ok(Some(room)),
            Err(ClientError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn room(&self, room_id: Uuid) -> Result<RoomResponse> {
        self.send(self.authed(Method::GET, &format!("/rooms/{room_id}"))?)
            .await
    }

    pub async fn members(&self, room_id: Uuid) -> Result<Vec<UserProfile>> {
        self.send(self.authed(Method::GET, &format!("/rooms/{room_id}/members"))?)
            .await
    }

    pub async fn start_call(&self, room_id: Uuid) -> Result<String> {
        let resp: StartCallResponse = self
            .send(self.authed(Method::POST, &format!("/rooms/{room_id}/call"))?)
            .await?;
        Ok(resp.url)
    }

    // -- Canvas --

    pub async fn strokes(&self, room_id: Uuid) -> Result<Vec<Stroke>> {
        self.send(self.authed(Method::GET, &format!("/rooms/{room_id}/strokes"))?)
            .await
    }

    pub async fn commit_stroke(&self, room_id: Uuid, stroke: &CommitStrokeRequest) -> Result<Stroke> {
        self.json(Method::POST, &format!("/rooms/{room_id}/strokes"), stroke)
            .await
    }

    pub async fn undo(&self, room_id: Uuid) -> Result<Option<Uuid>> {
        let resp: UndoResponse = self
            .send(self.authed(Method::POST, &format!("/rooms/{room_id}/strokes/undo"))?)
            .await?;
        Ok(resp.removed)
    }

    pub async fn clear(&self, room_id: Uuid) -> Result<usize> {
        let resp: ClearResponse = self
            .send(self.authed(Method::POST, &format!("/rooms/{room_id}/clear"))?)
            .await?;
        Ok(resp.removed)
    }

    // -- Chat --

    pub async fn messages(&self, room_id: Uuid) -> Result<Vec<Message>> {
        self.send(self.authed(Method::GET, &format!("/rooms/{room_id}/messages"))?)
            .await
    }

    pub async fn send_message(&self, room_id: Uuid, text: &str) -> Result<Message> {
        let body = SendMessageRequest {
            text: text.to_string(),
        };
        self.json(Method::POST, &format!("/rooms/{room_id}/messages"), &body)
            .await
    }

    pub async fn settings(&self, room_id: Uuid) -> Result<ChatSettings> {
        self.send(self.authed(Method::GET, &format!("/rooms/{room_id}/settings"))?)
            .await
    }

    pub async fn update_settings(&self, room_id: Uuid, patch: &ChatSettings) -> Result<ChatSettings> {
        self.json(Method::PATCH, &format!("/rooms/{room_id}/settings"), patch)
            .await
    }

    // -- Backgrounds --

    /// Upload a background image in chunks and return its download URL.
    pub async fn upload_background(
        &self,
        room_id: Uuid,
        target: UploadTarget,
        data: &[u8],
    ) -> Result<String> {
        let status = self.begin_upload(room_id, target).await?;
        info!("Uploading {} bytes as {} ({})", data.len(), target.as_str(), status.upload_id);
        self.resume_upload(status.upload_id, data, status.received).await
    }

    pub async fn begin_upload(&self, room_id: Uuid, target: UploadTarget) -> Result<UploadStatus> {
        self.json(
            Method::POST,
            &format!("/rooms/{room_id}/uploads"),
            &BeginUploadRequest { target },
        )
        .await
    }

    /// Send `data` from `offset` onwards, then complete the upload.
    ///
    /// A conflict reply carries the server's byte count; sending resumes
    /// from there instead of starting over.
    pub async fn resume_upload(&self, upload_id: Uuid, data: &[u8], offset: u64) -> Result<String> {
        let mut offset = offset as usize;
        let mut resyncs = 0;
        while offset < data.len() {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(data.len());
            match self.put_chunk(upload_id, offset as u64, &data[offset..end]).await {
                Ok(status) => offset = status.received as usize,
                Err(ClientError::Api {
                    status: 409,
                    received: Some(received),
                    ..
                }) if resyncs < MAX_UPLOAD_RESYNCS => {
                    warn!("Upload {} resuming at {} instead of {}", upload_id, received, offset);
                    resyncs += 1;
                    offset = received as usize;
                }
                Err(e) => return Err(e),
            }
        }

        let body = CompleteUploadRequest {
            sha256: hex::encode(Sha256::digest(data)),
        };
        let done: CompleteUploadResponse = self
            .json(Method::POST, &format!("/uploads/{upload_id}/complete"), &body)
            .await?;
        Ok(done.url)
    }

    pub async fn upload_status(&self, upload_id: Uuid) -> Result<UploadStatus> {
        self.send(self.authed(Method::GET, &format!("/uploads/{upload_id}"))?)
            .await
    }

    pub async fn put_chunk(&self, upload_id: Uuid, offset: u64, chunk: &[u8]) -> Result<UploadStatus> {
        let req = self
            .authed(Method::PUT, &format!("/uploads/{upload_id}"))?
            .query(&[("offset", offset)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(chunk.to_vec());
        self.send(req).await
    }

    /// Raw bytes of a public object URL.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(url).send().await?;
        let resp = check(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    // -- Plumbing --

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ClientError::NotSignedIn)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.authed(method, path)?.json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = check(req.send().await?).await?;
        Ok(resp.json().await?)
    }
}

/// Turn a non-2xx response into `ClientError::Api`.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let (message, received) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.received),
        Err(_) => (text, None),
    };
    debug!("Request failed with {}: {}", status, message);

    Err(ClientError::Api {
        status: status.as_u16(),
        message: if message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("error")
                .to_string()
        } else {
            message
        },
        received,
    })
}
