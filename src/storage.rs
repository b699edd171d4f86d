use crate::error::FetchError;
use directories::ProjectDirs;
use log::warn;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Local storage for transfers: a persistent downloads directory and an
/// ephemeral directory for stream-for-playback fetches. Enumeration and
/// removal are best-effort housekeeping; their failures are swallowed.
pub struct LocalStorage {
    downloads: PathBuf,
    stream: PathBuf,
}

impl LocalStorage {
    pub fn new(downloads: impl Into<PathBuf>, stream: impl Into<PathBuf>) -> io::Result<Self> {
        let downloads = downloads.into();
        let stream = stream.into();
        fs::create_dir_all(&downloads)?;
        fs::create_dir_all(&stream)?;
        Ok(Self { downloads, stream })
    }

    /// Platform-default locations: downloads under the per-user data dir,
    /// stream files under the system temp dir.
    pub fn with_default_dirs() -> io::Result<Self> {
        let downloads = ProjectDirs::from("dev", "netshelf", "netshelf")
            .map(|dirs| dirs.data_dir().join("downloads"))
            .unwrap_or_else(|| PathBuf::from("downloads"));
        let stream = std::env::temp_dir().join("netshelf");
        Self::new(downloads, stream)
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads
    }

    pub fn stream_dir(&self) -> &Path {
        &self.stream
    }

    /// Local filename policy: only the final path component of the remote
    /// name is used, so a name can never climb out of the storage
    /// directories. Same-named files from different remote directories
    /// deliberately collide.
    fn sanitize(name: &str) -> Option<&str> {
        let candidate = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .trim();
        if candidate.is_empty() || candidate == "." || candidate == ".." {
            None
        } else {
            Some(candidate)
        }
    }

    pub fn download_path(&self, name: &str) -> Result<PathBuf, FetchError> {
        Self::sanitize(name)
            .map(|n| self.downloads.join(n))
            .ok_or_else(|| FetchError::WriteFailed(format!("unusable file name: {name:?}")))
    }

    pub fn stream_path(&self, name: &str) -> Result<PathBuf, FetchError> {
        Self::sanitize(name)
            .map(|n| self.stream.join(n))
            .ok_or_else(|| FetchError::WriteFailed(format!("unusable file name: {name:?}")))
    }

    /// Completed downloads currently on disk, sorted by name. Any
    /// enumeration failure yields an empty list.
    pub fn list_downloads(&self) -> Vec<PathBuf> {
        let Ok(reader) = fs::read_dir(&self.downloads) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = reader
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }

    /// Best-effort removal. Paths outside the managed directories are
    /// refused; a missing file is a no-op.
    pub fn delete(&self, path: &Path) {
        if !path.starts_with(&self.downloads) && !path.starts_with(&self.stream) {
            warn!("refusing to delete {} outside storage dirs", path.display());
            return;
        }
        let _ = fs::remove_file(path);
    }
}
