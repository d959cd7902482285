//! Drives a real server over HTTP and the WebSocket gateway.

use std::sync::Arc;
use std::time::Duration;

use duo_api::identity::GoogleVerifier;
use duo_api::storage::ObjectStore;
use duo_api::{AppStateInner, router};
use duo_client::{ClientError, DuoClient, RoomFeed, RoomView, Session, StrokeCapture};
use duo_db::Database;
use duo_gateway::Dispatcher;
use duo_types::events::{Feed, GatewayEvent};
use duo_types::models::{ChatSettings, Point, ThemeMode, UploadTarget};

struct Server {
    base_url: String,
    _dir: tempfile::TempDir,
}

async fn spawn_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let db = Arc::new(Database::open_in_memory().unwrap());
    let state = Arc::new(AppStateInner {
        dispatcher: Dispatcher::new(db.clone()),
        db,
        store: ObjectStore::new(dir.path().to_path_buf()).await.unwrap(),
        identity: GoogleVerifier::new("http://127.0.0.1:9/tokeninfo", None),
        jwt_secret: "e2e-secret".into(),
        public_url: base_url.clone(),
        invite_base: "https://duolove.app".into(),
        call_base: "https://meet.jit.si".into(),
        max_upload_bytes: 4 * 1024 * 1024,
    });

    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base_url,
        _dir: dir,
    }
}

async fn next_event(feed: &mut RoomFeed) -> GatewayEvent {
    tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("timed out waiting for a feed event")
        .expect("feed closed")
}

#[tokio::test]
async fn pairing_and_drawing() {
    let server = spawn_server().await;

    let alice = Session::anonymous(&server.base_url, Some("Alice")).await.unwrap();
    let mut bob = Session::anonymous(&server.base_url, None).await.unwrap();
    assert!(alice.resolve_room().await.is_none());

    let room = alice.client().create_room().await.unwrap();
    let room_id = room.room.id;
    assert_eq!(room.invite_code, room_id.to_string());

    // Not a member yet.
    let denied = bob.client().strokes(room_id).await.unwrap_err();
    assert_eq!(denied.status(), Some(403));

    let joined = bob.client().join_room(&room.invite_code).await.unwrap();
    assert_eq!(joined.room.members.len(), 2);
    assert_eq!(bob.resolve_room().await.unwrap().room.id, room_id);

    bob.rename("Bob").await.unwrap();
    let members = alice.client().members(room_id).await.unwrap();
    assert_eq!(members[1].display_name, "Bob");

    let mut feed = RoomFeed::connect(bob.client(), room_id, &[Feed::Strokes])
        .await
        .unwrap();
    assert_eq!(feed.user_id(), bob.user().id);

    let mut view = RoomView::new(room_id);
    assert!(view.apply(next_event(&mut feed).await));
    assert!(view.strokes().is_empty());

    let mut capture = StrokeCapture::new();
    capture.brush_mut().set_color("#FF0000");
    capture.begin(Point::new(10.0, 10.0));
    capture.sample(Point::new(20.0, 25.0));
    capture.end(alice.client(), room_id).await;

    assert!(view.apply(next_event(&mut feed).await));
    assert_eq!(view.strokes().len(), 1);
    assert_eq!(view.strokes()[0].color, "#FF0000");

    capture.begin(Point::new(1.0, 1.0));
    capture.end(alice.client(), room_id).await;
    view.apply(next_event(&mut feed).await);
    assert_eq!(view.strokes().len(), 2);

    let removed = bob.client().undo(room_id).await.unwrap();
    assert_eq!(removed, Some(view.strokes()[1].id));
    view.apply(next_event(&mut feed).await);
    assert_eq!(view.strokes().len(), 1);

    assert_eq!(alice.client().clear(room_id).await.unwrap(), 1);
    view.apply(next_event(&mut feed).await);
    assert!(view.strokes().is_empty());

    assert_eq!(bob.client().undo(room_id).await.unwrap(), None);
}

#[tokio::test]
async fn chat_settings_and_messages() {
    let server = spawn_server().await;
    let alice = Session::anonymous(&server.base_url, Some("Alice")).await.unwrap();
    let room_id = alice.client().create_room().await.unwrap().room.id;

    let mut feed = RoomFeed::connect(
        alice.client(),
        room_id,
        &[Feed::Messages, Feed::Settings],
    )
    .await
    .unwrap();
    let mut view = RoomView::new(room_id);
    view.apply(next_event(&mut feed).await);
    view.apply(next_event(&mut feed).await);
    assert_eq!(view.effective_settings(), ChatSettings::defaults());

    let settings = alice.client().settings(room_id).await.unwrap();
    assert_eq!(settings, ChatSettings::defaults());
    // Reading the defaults for the first time writes them.
    view.apply(next_event(&mut feed).await);

    let updated = alice
        .client()
        .update_settings(
            room_id,
            &ChatSettings {
                theme_mode: Some(ThemeMode::Light),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.theme_mode(), ThemeMode::Light);
    assert_eq!(updated.corner_radius(), ChatSettings::DEFAULT_CORNER_RADIUS);
    view.apply(next_event(&mut feed).await);
    assert_eq!(view.effective_settings().theme_mode(), ThemeMode::Light);

    let sent = alice.client().send_message(room_id, "  hola  ").await.unwrap();
    assert_eq!(sent.text, "hola");
    assert_eq!(sent.sender_name, "Alice");
    view.apply(next_event(&mut feed).await);
    assert_eq!(view.messages().len(), 1);
    assert!(RoomView::is_own(&view.messages()[0], alice.user().id));

    let blank = alice.client().send_message(room_id, "   ").await.unwrap_err();
    assert_eq!(blank.status(), Some(400));
}

#[tokio::test]
async fn background_upload_round_trip() {
    let server = spawn_server().await;
    let alice = Session::anonymous(&server.base_url, None).await.unwrap();
    let room_id = alice.client().create_room().await.unwrap().room.id;

    // Larger than one chunk so the upload spans several requests.
    let image: Vec<u8> = (0..600 * 1024).map(|i| (i % 251) as u8).collect();
    let url = alice
        .client()
        .upload_background(room_id, UploadTarget::CanvasBackground, &image)
        .await
        .unwrap();
    assert!(url.starts_with(&server.base_url));

    let room = alice.client().room(room_id).await.unwrap();
    assert_eq!(room.room.background_image_url.as_deref(), Some(url.as_str()));

    let downloaded = alice.client().download(&url).await.unwrap();
    assert_eq!(downloaded, image);

    let chat_url = alice
        .client()
        .upload_background(room_id, UploadTarget::ChatBackground, b"jpeg")
        .await
        .unwrap();
    let settings = alice.client().settings(room_id).await.unwrap();
    assert_eq!(settings.background_url.as_deref(), Some(chat_url.as_str()));
}

#[tokio::test]
async fn upload_resumes_after_offset_conflict() {
    let server = spawn_server().await;
    let alice = Session::anonymous(&server.base_url, None).await.unwrap();
    let room_id = alice.client().create_room().await.unwrap().room.id;

    let image: Vec<u8> = (0..300 * 1024).map(|i| (i % 241) as u8).collect();
    let status = alice
        .client()
        .begin_upload(room_id, UploadTarget::CanvasBackground)
        .await
        .unwrap();

    // Another attempt already delivered the head of the object.
    let head = alice
        .client()
        .put_chunk(status.upload_id, 0, &image[..1000])
        .await
        .unwrap();
    assert_eq!(head.received, 1000);

    // Starting from zero hits a conflict and resumes at the server's count.
    let url = alice
        .client()
        .resume_upload(status.upload_id, &image, 0)
        .await
        .unwrap();
    assert_eq!(alice.client().download(&url).await.unwrap(), image);

    let err = alice
        .client()
        .upload_status(status.upload_id)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn wrong_hash_is_rejected() {
    let server = spawn_server().await;
    let alice = Session::anonymous(&server.base_url, None).await.unwrap();
    let room_id = alice.client().create_room().await.unwrap().room.id;

    let status = alice
        .client()
        .begin_upload(room_id, UploadTarget::ChatBackground)
        .await
        .unwrap();
    alice
        .client()
        .put_chunk(status.upload_id, 0, b"original")
        .await
        .unwrap();

    // Completing claims different bytes than the server holds.
    let err = alice
        .client()
        .resume_upload(status.upload_id, b"tampered", 8)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));

    let progress = alice.client().upload_status(status.upload_id).await.unwrap();
    assert_eq!(progress.received, 8);
}

#[tokio::test]
async fn feed_needs_sign_in() {
    let server = spawn_server().await;
    let client = DuoClient::new(&server.base_url);
    let err = RoomFeed::connect(&client, uuid::Uuid::new_v4(), &Feed::ALL)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::NotSignedIn));
}
