pub mod ftp;
pub mod nfs;
pub mod smb;
pub mod webdav;

use crate::error::{ConnectionError, FetchError, ListError};
use crate::profile::{Protocol, ServerProfile};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// One entry of a remote directory listing. Instances are constructed fresh
/// on every listing; ids are not stable across repeated listings of the same
/// path.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub id: Uuid,
    pub name: String,
    /// Absolute path within the remote root.
    pub path: String,
    pub is_dir: bool,
    /// Present iff the entry is a file.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Local>>,
}

impl RemoteFile {
    pub fn file(
        name: impl Into<String>,
        path: impl Into<String>,
        size: Option<u64>,
        modified: Option<DateTime<Local>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            is_dir: false,
            size,
            modified,
        }
    }

    pub fn dir(
        name: impl Into<String>,
        path: impl Into<String>,
        modified: Option<DateTime<Local>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            is_dir: true,
            size: None,
            modified,
        }
    }
}

/// Capability set every protocol backend provides. Backends hold no
/// per-session credential state; each operation receives the profile.
#[async_trait]
pub trait ProtocolBackend: Send + Sync {
    /// Establish (or probe) whatever handshake state the protocol needs.
    async fn connect(&self, profile: &ServerProfile) -> Result<(), ConnectionError>;

    /// List the immediate children of `path`, normalized into [`RemoteFile`]
    /// entries in the order the server reported them. Malformed entries are
    /// skipped; a wholly unparsable response fails the listing.
    async fn list(&self, profile: &ServerProfile, path: &str)
        -> Result<Vec<RemoteFile>, ListError>;

    /// Stream the file's bytes into `dest`. Returns the number of bytes
    /// written. The same sink-based path serves downloads and
    /// stream-for-playback fetches.
    async fn fetch(
        &self,
        profile: &ServerProfile,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<u64, FetchError>;

    /// Lifecycle hook for protocols with persistent sessions. Stateless
    /// backends have nothing to tear down.
    async fn teardown(&self, _profile: &ServerProfile) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Maps a protocol kind to its backend implementation. Pure lookup, no
/// session state.
pub struct ProtocolRegistry {
    backends: HashMap<Protocol, Arc<dyn ProtocolBackend>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry with one backend per supported protocol.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Protocol::Ftp, Arc::new(ftp::FtpBackend::new()));
        registry.register(Protocol::Webdav, Arc::new(webdav::WebdavBackend::new()));
        registry.register(Protocol::Smb, Arc::new(smb::SmbBackend::new()));
        registry.register(Protocol::Nfs, Arc::new(nfs::NfsBackend::new()));
        registry
    }

    pub fn register(&mut self, protocol: Protocol, backend: Arc<dyn ProtocolBackend>) {
        self.backends.insert(protocol, backend);
    }

    pub fn resolve(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolBackend>> {
        self.backends.get(&protocol).cloned()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
