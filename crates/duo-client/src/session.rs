use tracing::{error, info};

use duo_types::api::RoomResponse;
use duo_types::models::UserProfile;

use crate::error::Result;
use crate::http::DuoClient;

/// A signed-in identity and the client that speaks for it.
pub struct Session {
    client: DuoClient,
    user: UserProfile,
}

impl Session {
    pub async fn anonymous(base_url: &str, display_name: Option<&str>) -> Result<Self> {
        let mut client = DuoClient::new(base_url);
        let user = client.sign_in_anonymous(display_name).await?;
        info!("Signed in anonymously as {}", user.id);
        Ok(Self { client, user })
    }

    pub async fn federated(base_url: &str, id_token: &str) -> Result<Self> {
        let mut client = DuoClient::new(base_url);
        let user = client.sign_in_federated(id_token).await?;
        info!("Signed in with Google as {}", user.id);
        Ok(Self { client, user })
    }

    pub fn client(&self) -> &DuoClient {
        &self.client
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    /// The room this user belongs to, if any.
    ///
    /// Failures are logged and reported as "no room", the same as a user who
    /// has not paired yet.
    pub async fn resolve_room(&self) -> Option<RoomResponse> {
        match self.client.my_room().await {
            Ok(room) => room,
            Err(e) => {
                error!("Room lookup for {} failed: {}", self.user.id, e);
                None
            }
        }
    }

    /// Record a new display name on the server and locally.
    pub async fn rename(&mut self, display_name: &str) -> Result<()> {
        self.user = self.client.update_display_name(display_name).await?;
        Ok(())
    }
}
