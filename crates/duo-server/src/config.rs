use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Unfinished uploads older than this are pruned.
const DEFAULT_UPLOAD_TTL_SECS: u64 = 24 * 60 * 60;

const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub jwt_secret: String,
    pub public_url: String,
    pub invite_base: String,
    pub call_base: String,
    pub google_tokeninfo_url: String,
    pub google_client_id: Option<String>,
    pub max_upload_bytes: u64,
    pub upload_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("DUO_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DUO_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = var("DUO_PORT", "3000")
            .parse()
            .context("DUO_PORT is not a port number")?;
        let max_upload_bytes = match lookup("DUO_MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse()
                .context("DUO_MAX_UPLOAD_BYTES is not a byte count")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let upload_ttl_secs = match lookup("DUO_UPLOAD_TTL_SECS") {
            Some(raw) => raw
                .parse()
                .context("DUO_UPLOAD_TTL_SECS is not a number of seconds")?,
            None => DEFAULT_UPLOAD_TTL_SECS,
        };
        let cleanup_interval_secs: u64 = match lookup("DUO_CLEANUP_INTERVAL_SECS") {
            Some(raw) => raw
                .parse()
                .context("DUO_CLEANUP_INTERVAL_SECS is not a number of seconds")?,
            None => DEFAULT_CLEANUP_INTERVAL_SECS,
        };
        if cleanup_interval_secs == 0 {
            bail!("DUO_CLEANUP_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            host: var("DUO_HOST", "0.0.0.0"),
            port,
            db_path: var("DUO_DB_PATH", "duo.db").into(),
            storage_dir: var("DUO_STORAGE_DIR", "./object-storage").into(),
            jwt_secret,
            public_url: var("DUO_PUBLIC_URL", "http://localhost:3000"),
            invite_base: var("DUO_INVITE_BASE", "https://duolove.app"),
            call_base: var("DUO_CALL_BASE", "https://meet.jit.si"),
            google_tokeninfo_url: var(
                "DUO_GOOGLE_TOKENINFO_URL",
                "https://oauth2.googleapis.com/tokeninfo",
            ),
            google_client_id: lookup("DUO_GOOGLE_CLIENT_ID").filter(|id| !id.is_empty()),
            max_upload_bytes,
            upload_ttl_secs,
            cleanup_interval_secs,
        })
    }
}
