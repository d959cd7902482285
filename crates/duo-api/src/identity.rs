use serde::Deserialize;

/// Verifies Google ID tokens against a token-info endpoint.
pub struct GoogleVerifier {
    http: reqwest::Client,
    tokeninfo_url: String,
    /// Expected `aud`; any audience is accepted when unset.
    client_id: Option<String>,
}

/// The parts of a verified token the service keeps.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("token rejected by identity provider (HTTP {0})")]
    Rejected(u16),

    #[error("token issued for another client ({0})")]
    WrongAudience(String),

    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    sub: String,
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl GoogleVerifier {
    pub fn new(tokeninfo_url: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokeninfo_url: tokeninfo_url.into(),
            client_id,
        }
    }

    pub async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let resp = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(IdentityError::Rejected(resp.status().as_u16()));
        }

        let info: TokenInfo = resp.json().await?;

        if let Some(expected) = &self.client_id {
            let aud = info.aud.unwrap_or_default();
            if &aud != expected {
                return Err(IdentityError::WrongAudience(aud));
            }
        }

        Ok(VerifiedIdentity {
            subject: info.sub,
            email: info.email.unwrap_or_default(),
            name: info.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Query, http::StatusCode, routing::get};
    use std::collections::HashMap;

    /// Fake token-info endpoint: "good" is valid for client "duo", anything else is rejected.
    async fn spawn_tokeninfo() -> String {
        async fn tokeninfo(
            Query(q): Query<HashMap<String, String>>,
        ) -> Result<Json<serde_json::Value>, StatusCode> {
            match q.get("id_token").map(String::as_str) {
                Some("good") => Ok(Json(serde_json::json!({
                    "sub": "10769150350006150715113082367",
                    "aud": "duo",
                    "email": "ana@example.com",
                    "name": "Ana",
                }))),
                _ => Err(StatusCode::BAD_REQUEST),
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/tokeninfo", get(tokeninfo)))
                .await
                .unwrap();
        });
        format!("http://{addr}/tokeninfo")
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let verifier = GoogleVerifier::new(spawn_tokeninfo().await, Some("duo".into()));
        let identity = verifier.verify("good").await.unwrap();
        assert_eq!(identity.subject, "10769150350006150715113082367");
        assert_eq!(identity.email, "ana@example.com");
        assert_eq!(identity.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn rejects_bad_token() {
        let verifier = GoogleVerifier::new(spawn_tokeninfo().await, None);
        assert!(matches!(
            verifier.verify("forged").await,
            Err(IdentityError::Rejected(400))
        ));
    }

    #[tokio::test]
    async fn rejects_other_audience() {
        let verifier = GoogleVerifier::new(spawn_tokeninfo().await, Some("someone-else".into()));
        assert!(matches!(
            verifier.verify("good").await,
            Err(IdentityError::WrongAudience(_))
        ));
    }
}
