use super::{ProtocolBackend, RemoteFile};
use crate::error::{ConnectionError, FetchError, ListError};
use crate::profile::ServerProfile;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::debug;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// NFS backend over a kernel-mounted export. No userspace NFS client is
/// assumed: the profile's root path names the local mount point of the
/// export (host and port identify the server for display only), and all
/// operations go through `tokio::fs` against that mount.
pub struct NfsBackend;

impl NfsBackend {
    pub fn new() -> Self {
        Self
    }

    fn mount_root(profile: &ServerProfile) -> Result<PathBuf, ConnectionError> {
        let root = Path::new(&profile.root_path);
        if profile.root_path.is_empty() || !root.is_absolute() {
            return Err(ConnectionError::InvalidAddress(
                "NFS root path must be an absolute mount point".into(),
            ));
        }
        Ok(root.to_path_buf())
    }

    /// Resolve a remote path below the mount root. Parent and root
    /// components are rejected so a listing entry can never escape the
    /// export.
    fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
        let mut resolved = root.to_path_buf();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }

    fn entry_path(base: &str, name: &str) -> String {
        if base.trim_end_matches('/').is_empty() {
            format!("/{name}")
        } else {
            format!("{}/{}", base.trim_end_matches('/'), name)
        }
    }
}

impl Default for NfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolBackend for NfsBackend {
    async fn connect(&self, profile: &ServerProfile) -> Result<(), ConnectionError> {
        let root = Self::mount_root(profile)?;
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|e| ConnectionError::Unreachable(format!("mount point unavailable: {e}")))?;
        if !meta.is_dir() {
            return Err(ConnectionError::Unreachable(
                "mount point is not a directory".into(),
            ));
        }
        Ok(())
    }

    async fn list(
        &self,
        profile: &ServerProfile,
        path: &str,
    ) -> Result<Vec<RemoteFile>, ListError> {
        let root = Self::mount_root(profile)?;
        let dir = Self::resolve(&root, path).ok_or_else(|| ListError::NotFound(path.to_string()))?;

        let mut reader = tokio::fs::read_dir(&dir).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ListError::NotFound(path.to_string())
            } else {
                ListError::Unreachable(e.to_string())
            }
        })?;

        let mut files = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ListError::Unreachable(e.to_string()))?
        {
            // Entries whose name or metadata cannot be read are skipped.
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Ok(meta) = entry.metadata().await else {
                continue;
            };

            let entry_path = Self::entry_path(path, &name);
            let modified = meta.modified().ok().map(DateTime::<Local>::from);
            files.push(if meta.is_dir() {
                RemoteFile::dir(name, entry_path, modified)
            } else {
                RemoteFile::file(name, entry_path, Some(meta.len()), modified)
            });
        }

        // readdir order is not stable; present entries sorted by name.
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("NFS listed {} entries under {path}", files.len());
        Ok(files)
    }

    async fn fetch(
        &self,
        profile: &ServerProfile,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<u64, FetchError> {
        let root = Self::mount_root(profile)?;
        let source = Self::resolve(&root, &file.path)
            .ok_or_else(|| FetchError::NotFound(file.path.clone()))?;

        let mut reader = tokio::fs::File::open(&source).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                FetchError::NotFound(file.path.clone())
            } else {
                FetchError::Unreachable(e.to_string())
            }
        })?;
        let mut writer = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::WriteFailed(e.to_string()))?;

        let written = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| FetchError::WriteFailed(e.to_string()))?;
        Ok(written)
    }
}
