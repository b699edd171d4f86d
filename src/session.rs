use crate::client::{ProtocolBackend, ProtocolRegistry, RemoteFile};
use crate::error::{ConnectionError, ListError};
use crate::profile::ServerProfile;
use log::{debug, warn};
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Published session state, updated atomically per operation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub profile: Option<ServerProfile>,
    pub current_path: String,
    pub files: Vec<RemoteFile>,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            profile: None,
            current_path: "/".to_string(),
            files: Vec::new(),
            loading: false,
            last_error: None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct ActiveSession {
    pub profile: ServerProfile,
    pub backend: Arc<dyn ProtocolBackend>,
}

/// Owns the single active session: resolves the backend for a profile,
/// runs connect/list against it, and publishes observable state. Connect
/// and list are serialized; a later call waits for the one in flight.
pub struct SessionManager {
    registry: Arc<ProtocolRegistry>,
    // Held across the backend call so published state has one writer at a
    // time.
    op: Mutex<()>,
    active: RwLock<Option<ActiveSession>>,
    published: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(registry: Arc<ProtocolRegistry>) -> Self {
        let (published, _) = watch::channel(SessionSnapshot::default());
        Self {
            registry,
            op: Mutex::new(()),
            active: RwLock::new(None),
            published,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.published.borrow().clone()
    }

    /// Observers receive every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.published.subscribe()
    }

    pub(crate) fn active(&self) -> Option<ActiveSession> {
        self.active.read().expect("session lock poisoned").clone()
    }

    fn publish(&self, update: impl FnOnce(&mut SessionSnapshot)) {
        self.published.send_modify(update);
    }

    fn set_active(&self, session: Option<ActiveSession>) {
        *self.active.write().expect("session lock poisoned") = session;
    }

    /// Connect to a new server. The previous session, if any, is discarded
    /// before the handshake starts, regardless of the outcome.
    pub async fn connect(&self, profile: ServerProfile) -> Result<(), ConnectionError> {
        let _op = self.op.lock().await;

        self.set_active(None);
        let root = profile.root_path.clone();
        self.publish(|s| {
            s.state = ConnectionState::Connecting;
            s.profile = Some(profile.clone());
            s.current_path = root;
            s.files.clear();
            s.loading = false;
            s.last_error = None;
        });

        let Some(backend) = self.registry.resolve(profile.protocol()) else {
            let err = ConnectionError::Unsupported(profile.protocol().to_string());
            self.record_connect_failure(&err);
            return Err(err);
        };

        debug!("connecting to {} via {}", profile.host, profile.protocol());
        match backend.connect(&profile).await {
            Ok(()) => {
                self.set_active(Some(ActiveSession {
                    profile,
                    backend,
                }));
                self.publish(|s| s.state = ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                warn!("connect failed: {err}");
                self.record_connect_failure(&err);
                Err(err)
            }
        }
    }

    /// Failures pass through the error state and settle at disconnected;
    /// the error itself stays published.
    fn record_connect_failure(&self, err: &ConnectionError) {
        self.publish(|s| {
            s.state = ConnectionState::Error;
            s.profile = None;
            s.files.clear();
            s.last_error = Some(err.to_string());
        });
        self.publish(|s| s.state = ConnectionState::Disconnected);
    }

    /// List a remote directory; `None` lists the profile root. On failure
    /// the previous listing is preserved and the loading flag is cleared
    /// either way.
    pub async fn list_files(&self, path: Option<&str>) -> Result<Vec<RemoteFile>, ListError> {
        let _op = self.op.lock().await;

        let Some(active) = self.active() else {
            let err = ListError::NotConnected;
            self.publish(|s| s.last_error = Some(err.to_string()));
            return Err(err);
        };

        let path = path
            .map(str::to_string)
            .unwrap_or_else(|| active.profile.root_path.clone());
        self.publish(|s| {
            s.loading = true;
            s.last_error = None;
        });

        let result = active.backend.list(&active.profile, &path).await;
        match &result {
            Ok(files) => {
                let files = files.clone();
                self.publish(|s| {
                    s.files = files;
                    s.current_path = path;
                    s.loading = false;
                });
            }
            Err(err) => {
                warn!("listing {path} failed: {err}");
                let message = err.to_string();
                self.publish(|s| {
                    s.last_error = Some(message);
                    s.loading = false;
                });
            }
        }
        result
    }

    /// Drop the session. Backends with persistent state get their teardown
    /// hook invoked best-effort.
    pub async fn disconnect(&self) {
        let _op = self.op.lock().await;

        let previous = {
            let mut guard = self.active.write().expect("session lock poisoned");
            guard.take()
        };
        if let Some(active) = previous {
            if let Err(err) = active.backend.teardown(&active.profile).await {
                warn!("backend teardown failed: {err}");
            }
        }
        self.publish(|s| *s = SessionSnapshot::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::profile::{Protocol, Secret};
    use async_trait::async_trait;
    use mockall::mock;
    use std::path::Path;

    mock! {
        pub Backend {}

        #[async_trait]
        impl ProtocolBackend for Backend {
            async fn connect(&self, profile: &ServerProfile) -> Result<(), ConnectionError>;
            async fn list(
                &self,
                profile: &ServerProfile,
                path: &str,
            ) -> Result<Vec<RemoteFile>, ListError>;
            async fn fetch(
                &self,
                profile: &ServerProfile,
                file: &RemoteFile,
                dest: &Path,
            ) -> Result<u64, FetchError>;
        }
    }

    fn profile() -> ServerProfile {
        ServerProfile::new(
            "test",
            Protocol::Ftp,
            "192.168.1.1",
            21,
            "user",
            Secret::new("pass"),
            "/music",
        )
    }

    fn manager_with(mock: MockBackend) -> SessionManager {
        let mut registry = ProtocolRegistry::new();
        registry.register(Protocol::Ftp, Arc::new(mock));
        SessionManager::new(Arc::new(registry))
    }

    fn listing() -> Vec<RemoteFile> {
        vec![
            RemoteFile::dir("Musik", "/music/Musik", None),
            RemoteFile::file("song1.mp3", "/music/song1.mp3", Some(5_000_000), None),
        ]
    }

    #[tokio::test]
    async fn successful_connect_publishes_connected_state() {
        let mut mock = MockBackend::new();
        mock.expect_connect().returning(|_| Ok(()));
        let manager = manager_with(mock);

        manager.connect(profile()).await.unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.current_path, "/music");
        assert!(snapshot.profile.is_some());
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn list_defaults_to_the_profile_root() {
        let mut mock = MockBackend::new();
        mock.expect_connect().returning(|_| Ok(()));
        mock.expect_list()
            .withf(|_, path| path == "/music")
            .returning(|_, _| Ok(vec![]));
        let manager = manager_with(mock);

        manager.connect(profile()).await.unwrap();
        manager.list_files(None).await.unwrap();
    }

    #[tokio::test]
    async fn failed_connect_settles_disconnected_and_clears_listing() {
        let mut mock = MockBackend::new();
        let mut connects = 0;
        mock.expect_connect().returning(move |_| {
            connects += 1;
            if connects == 1 {
                Ok(())
            } else {
                Err(ConnectionError::AuthFailed)
            }
        });
        mock.expect_list().returning(|_, _| Ok(listing()));
        let manager = manager_with(mock);

        manager.connect(profile()).await.unwrap();
        manager.list_files(None).await.unwrap();
        assert!(!manager.snapshot().files.is_empty());

        let err = manager.connect(profile()).await.unwrap_err();
        assert_eq!(err, ConnectionError::AuthFailed);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.files.is_empty());
        assert!(snapshot.profile.is_none());
        assert!(!snapshot.last_error.as_deref().unwrap_or("").is_empty());

        // The replaced session is gone for good: listing now fails.
        assert_eq!(
            manager.list_files(None).await.unwrap_err(),
            ListError::NotConnected
        );
    }

    #[tokio::test]
    async fn unknown_protocol_is_unsupported() {
        let manager = SessionManager::new(Arc::new(ProtocolRegistry::new()));
        let err = manager.connect(profile()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Unsupported(_)));
        assert_eq!(manager.snapshot().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn listing_without_a_session_fails_and_records_the_error() {
        let manager = SessionManager::new(Arc::new(ProtocolRegistry::new()));
        let err = manager.list_files(None).await.unwrap_err();
        assert_eq!(err, ListError::NotConnected);
        assert!(manager.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn failed_listing_preserves_the_previous_listing() {
        let mut mock = MockBackend::new();
        mock.expect_connect().returning(|_| Ok(()));
        let mut lists = 0;
        mock.expect_list().returning(move |_, _| {
            lists += 1;
            if lists == 1 {
                Ok(listing())
            } else {
                Err(ListError::NotFound("/gone".into()))
            }
        });
        let manager = manager_with(mock);

        manager.connect(profile()).await.unwrap();
        manager.list_files(None).await.unwrap();
        let before = manager.snapshot().files;

        let err = manager.list_files(Some("/gone")).await.unwrap_err();
        assert!(matches!(err, ListError::NotFound(_)));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.files, before);
        assert!(!snapshot.loading);
        assert!(snapshot.last_error.is_some());
        // The path of the failed listing is not published either.
        assert_eq!(snapshot.current_path, "/music");
    }

    #[tokio::test]
    async fn disconnect_resets_published_state() {
        let mut mock = MockBackend::new();
        mock.expect_connect().returning(|_| Ok(()));
        mock.expect_list().returning(|_, _| Ok(listing()));
        let manager = manager_with(mock);

        manager.connect(profile()).await.unwrap();
        manager.list_files(None).await.unwrap();
        manager.disconnect().await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.profile.is_none());
        assert!(snapshot.files.is_empty());
    }

    #[tokio::test]
    async fn observers_see_state_transitions() {
        let mut mock = MockBackend::new();
        mock.expect_connect().returning(|_| Ok(()));
        let manager = manager_with(mock);
        let mut rx = manager.subscribe();

        manager.connect(profile()).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, ConnectionState::Connected);
    }
}
