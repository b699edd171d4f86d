use netshelf::client::ProtocolRegistry;
use netshelf::error::{ConnectionError, ListError};
use netshelf::profile::{Protocol, Secret, ServerProfile};
use netshelf::session::{ConnectionState, SessionManager};
use netshelf::storage::LocalStorage;
use netshelf::transfer::{TransferCoordinator, TransferStatus};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MULTISTATUS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/Musik/</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>Musik</d:displayname>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/song1.mp3</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>song1.mp3</d:displayname>
        <d:resourcetype/>
        <d:getcontentlength>9</d:getcontentlength>
        <d:getlastmodified>Wed, 25 Dec 2024 10:30:45 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

fn profile_for(server: &MockServer) -> ServerProfile {
    let addr = server.address();
    ServerProfile::new(
        "dav",
        Protocol::Webdav,
        addr.ip().to_string(),
        addr.port(),
        "user",
        Secret::new("pass"),
        "/",
    )
}

async fn session_for(server: &MockServer) -> Arc<SessionManager> {
    let registry = Arc::new(ProtocolRegistry::with_defaults());
    let session = Arc::new(SessionManager::new(registry));
    session.connect(profile_for(server)).await.unwrap();
    session
}

#[tokio::test]
async fn browse_download_and_stream_against_a_webdav_server() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(MULTISTATUS, "application/xml"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/song1.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"mp3 bytes"[..]))
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    assert_eq!(session.snapshot().state, ConnectionState::Connected);

    let files = session.list_files(None).await.unwrap();
    assert_eq!(files.len(), 2);

    let dir = files.iter().find(|f| f.is_dir).unwrap();
    assert_eq!(dir.name, "Musik");
    assert_eq!(dir.size, None);

    let song = files.iter().find(|f| !f.is_dir).unwrap().clone();
    assert_eq!(song.name, "song1.mp3");
    assert_eq!(song.size, Some(9));

    let tmp = TempDir::new().unwrap();
    let storage =
        LocalStorage::new(tmp.path().join("downloads"), tmp.path().join("stream")).unwrap();
    let coordinator = TransferCoordinator::new(session.clone(), storage);

    let task = coordinator.download(&song).await.unwrap();
    assert_eq!(task.status, TransferStatus::Completed);
    let download_locator = task.local_path.unwrap();
    assert_eq!(std::fs::read(&download_locator).unwrap(), b"mp3 bytes");

    let stream_locator = coordinator.stream_for_playback(&song).await.unwrap();
    assert_ne!(stream_locator, download_locator);
    assert_eq!(std::fs::read(&stream_locator).unwrap(), b"mp3 bytes");
}

#[tokio::test]
async fn rejected_credentials_surface_as_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let registry = Arc::new(ProtocolRegistry::with_defaults());
    let session = SessionManager::new(registry);

    let err = session.connect(profile_for(&server)).await.unwrap_err();
    assert_eq!(err, ConnectionError::AuthFailed);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(!snapshot.last_error.as_deref().unwrap_or("").is_empty());
}

#[tokio::test]
async fn listing_a_missing_collection_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(MULTISTATUS, "application/xml"))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let err = session.list_files(Some("/gone")).await.unwrap_err();
    assert!(matches!(err, ListError::NotFound(_)));
    assert!(session.snapshot().last_error.is_some());
}
