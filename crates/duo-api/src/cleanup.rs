use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{AppState, AppStateInner};

/// Background task that prunes abandoned upload sessions.
///
/// Runs on an interval, finds sessions opened more than `ttl` ago that were
/// never completed, deletes their partial files and their rows.
pub async fn run_cleanup_loop(state: AppState, interval: Duration, ttl: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match prune_stale_uploads(&state, ttl).await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: pruned {} abandoned uploads", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {:#}", e);
            }
        }
    }
}

pub async fn prune_stale_uploads(state: &AppStateInner, ttl: Duration) -> anyhow::Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::from_std(ttl)?;
    let db = state.db.clone();
    let stale = tokio::task::spawn_blocking(move || db.stale_uploads(cutoff)).await??;

    for id in &stale {
        state.store.discard(id).await?;

        let db = state.db.clone();
        let row = id.clone();
        tokio::task::spawn_blocking(move || db.delete_upload(&row)).await??;
    }

    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use duo_db::Database;
    use duo_gateway::Dispatcher;
    use duo_types::models::{IdentityProvider, UploadTarget};
    use uuid::Uuid;

    use crate::identity::GoogleVerifier;
    use crate::storage::ObjectStore;

    struct Fixture {
        state: AppState,
        room_id: String,
        user_id: String,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4().to_string();
        let room_id = Uuid::new_v4().to_string();
        db.upsert_user(&user_id, "Ana", "", IdentityProvider::Anonymous)
            .unwrap();
        db.create_room(&room_id, &user_id).unwrap();

        let state = Arc::new(AppStateInner {
            dispatcher: Dispatcher::new(db.clone()),
            db,
            store: ObjectStore::new(dir.path().to_path_buf()).await.unwrap(),
            identity: GoogleVerifier::new("http://127.0.0.1:9/tokeninfo", None),
            jwt_secret: "test-secret".into(),
            public_url: "http://duo.test".into(),
            invite_base: "https://duolove.app".into(),
            call_base: "https://meet.jit.si".into(),
            max_upload_bytes: 1024,
        });
        Fixture {
            state,
            room_id,
            user_id,
            _dir: dir,
        }
    }

    impl Fixture {
        async fn begin(&self) -> String {
            let id = Uuid::new_v4().to_string();
            self.state
                .db
                .create_upload(&id, &self.room_id, &self.user_id, UploadTarget::ChatBackground)
                .unwrap();
            self.state.store.begin(&id).await.unwrap();
            self.state.store.append(&id, 0, b"half", 1024).await.unwrap();
            id
        }

        async fn exists(&self, id: &str) -> bool {
            let row = self.state.db.get_upload(id).unwrap().is_some();
            let partial = self.state.store.received(id).await.unwrap().is_some();
            assert_eq!(row, partial, "row and partial file out of step for {id}");
            row
        }
    }

    #[tokio::test]
    async fn keeps_recent_uploads() {
        let f = fixture().await;
        let id = f.begin().await;

        let pruned = prune_stale_uploads(&f.state, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(pruned, 0);
        assert!(f.exists(&id).await);
    }

    #[tokio::test]
    async fn prunes_expired_uploads() {
        let f = fixture().await;
        let id = f.begin().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let pruned = prune_stale_uploads(&f.state, Duration::ZERO).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(!f.exists(&id).await);
    }

    #[tokio::test]
    async fn loop_prunes_in_background() {
        let f = fixture().await;
        let id = f.begin().await;

        let task = tokio::spawn(run_cleanup_loop(
            f.state.clone(),
            Duration::from_millis(10),
            Duration::ZERO,
        ));

        let mut gone = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if f.state.db.get_upload(&id).unwrap().is_none() {
                gone = true;
                break;
            }
        }
        task.abort();

        assert!(gone, "upload {id} was never pruned");
        assert!(f.state.store.received(&id).await.unwrap().is_none());
    }
}
