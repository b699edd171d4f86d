use super::{ProtocolBackend, RemoteFile};
use crate::error::{ConnectionError, FetchError, ListError};
use crate::profile::ServerProfile;
use async_trait::async_trait;
use log::debug;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use suppaftp::{FtpError, FtpStream, Status};

/// FTP backend over blocking `suppaftp` streams. Every operation opens a
/// fresh control connection and quits when done, so there is no persistent
/// session to tear down.
pub struct FtpBackend;

impl FtpBackend {
    pub fn new() -> Self {
        Self
    }

    fn endpoint(profile: &ServerProfile) -> Result<String, ConnectionError> {
        if profile.host.trim().is_empty() {
            return Err(ConnectionError::InvalidAddress("empty host".into()));
        }
        if profile.port == 0 {
            return Err(ConnectionError::InvalidAddress(
                "port must be between 1 and 65535".into(),
            ));
        }
        Ok(format!("{}:{}", profile.host, profile.port))
    }

    fn open(endpoint: &str, username: &str, password: &str) -> Result<FtpStream, ConnectionError> {
        let mut ftp = FtpStream::connect(endpoint)
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        ftp.login(username, password).map_err(|e| match e {
            FtpError::UnexpectedResponse(ref resp) if resp.status == Status::NotLoggedIn => {
                ConnectionError::AuthFailed
            }
            other => ConnectionError::Unreachable(other.to_string()),
        })?;
        Ok(ftp)
    }

    fn is_file_unavailable(err: &FtpError) -> bool {
        matches!(err, FtpError::UnexpectedResponse(resp) if resp.status == Status::FileUnavailable)
    }

    /// Parse one line of a LIST response. A record is a directory iff its
    /// type flag marks it so; the size field must parse as a non-negative
    /// integer or the record is skipped; the trailing whitespace-delimited
    /// fields are rejoined as the filename (names may contain spaces).
    fn parse_list_line(line: &str, base: &str) -> Option<RemoteFile> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 {
            return None;
        }

        let is_dir = parts[0].starts_with('d');
        let size = parts[4].parse::<u64>().ok()?;
        let name = parts[8..].join(" ");
        if name.is_empty() {
            return None;
        }

        let path = format!("{}/{}", base.trim_end_matches('/'), name);
        // TODO: parse the month/day/time fields once the listing year can be
        // resolved (MLSD would make this exact).
        Some(if is_dir {
            RemoteFile::dir(name, path, None)
        } else {
            RemoteFile::file(name, path, Some(size), None)
        })
    }
}

impl Default for FtpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolBackend for FtpBackend {
    async fn connect(&self, profile: &ServerProfile) -> Result<(), ConnectionError> {
        let endpoint = Self::endpoint(profile)?;
        let username = profile.username.clone();
        let password = profile.password.expose().to_string();

        tokio::task::spawn_blocking(move || {
            let mut ftp = Self::open(&endpoint, &username, &password)?;
            let _ = ftp.quit();
            Ok::<_, ConnectionError>(())
        })
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))??;

        Ok(())
    }

    async fn list(
        &self,
        profile: &ServerProfile,
        path: &str,
    ) -> Result<Vec<RemoteFile>, ListError> {
        let endpoint = Self::endpoint(profile)?;
        let username = profile.username.clone();
        let password = profile.password.expose().to_string();
        let path = path.to_string();

        let files = tokio::task::spawn_blocking(move || {
            let mut ftp = Self::open(&endpoint, &username, &password)?;
            ftp.cwd(&path).map_err(|e| {
                if Self::is_file_unavailable(&e) {
                    ListError::NotFound(path.clone())
                } else {
                    ListError::Unreachable(e.to_string())
                }
            })?;
            let lines = ftp
                .list(None)
                .map_err(|e| ListError::Unreachable(e.to_string()))?;
            let _ = ftp.quit();

            let records: Vec<&str> = lines
                .iter()
                .map(String::as_str)
                .filter(|l| !l.trim().is_empty())
                .collect();
            let files: Vec<RemoteFile> = records
                .iter()
                .filter_map(|line| Self::parse_list_line(line, &path))
                .collect();

            // Malformed records are skipped, but a response from which
            // nothing parses is treated as unusable.
            if files.is_empty() && !records.is_empty() {
                return Err(ListError::Unreachable(
                    "unparsable LIST response".to_string(),
                ));
            }

            debug!("FTP listed {} entries under {path}", files.len());
            Ok::<_, ListError>(files)
        })
        .await
        .map_err(|e| ListError::Unreachable(e.to_string()))??;

        Ok(files)
    }

    async fn fetch(
        &self,
        profile: &ServerProfile,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<u64, FetchError> {
        let endpoint = Self::endpoint(profile)?;
        let username = profile.username.clone();
        let password = profile.password.expose().to_string();
        let remote_path = file.path.clone();
        let dest = dest.to_path_buf();

        let written = tokio::task::spawn_blocking(move || {
            let mut ftp = Self::open(&endpoint, &username, &password)?;
            let mut reader = ftp.retr_as_buffer(&remote_path).map_err(|e| {
                if Self::is_file_unavailable(&e) {
                    FetchError::NotFound(remote_path.clone())
                } else {
                    FetchError::Unreachable(e.to_string())
                }
            })?;
            let mut data = Vec::new();
            reader
                .read_to_end(&mut data)
                .map_err(|e| FetchError::Unreachable(e.to_string()))?;
            let _ = ftp.quit();

            let mut out =
                File::create(&dest).map_err(|e| FetchError::WriteFailed(e.to_string()))?;
            out.write_all(&data)
                .map_err(|e| FetchError::WriteFailed(e.to_string()))?;
            Ok::<_, FetchError>(data.len() as u64)
        })
        .await
        .map_err(|e| FetchError::Unreachable(e.to_string()))??;

        Ok(written)
    }
}
