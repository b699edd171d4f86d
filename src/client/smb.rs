use super::{ProtocolBackend, RemoteFile};
use crate::error::{ConnectionError, FetchError, ListError};
use crate::profile::ServerProfile;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use log::{debug, warn};
use std::path::Path;
use std::process::Command;
use tokio::process::Command as TokioCommand;

/// SMB backend shelling out to `smbclient`. Native SMB support is not
/// assumed; the Samba client binary does the wire protocol and every
/// command is a separate connection, so there is no session to tear down.
pub struct SmbBackend;

/// How a failed smbclient invocation should be interpreted.
enum SmbFailure {
    Auth,
    NotFound,
    Other(String),
}

impl SmbBackend {
    pub fn new() -> Self {
        Self
    }

    fn smbclient_available() -> bool {
        Command::new("smbclient")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// The first component of the profile root path names the share; the
    /// rest is the directory prefix inside it.
    fn split_root(profile: &ServerProfile) -> Result<(String, String), ConnectionError> {
        let trimmed = profile.root_path.trim_matches('/');
        let mut parts = trimmed.splitn(2, '/');
        let share = parts.next().unwrap_or("").to_string();
        if share.is_empty() {
            return Err(ConnectionError::InvalidAddress(
                "SMB root path must name a share".into(),
            ));
        }
        let prefix = parts.next().unwrap_or("").to_string();
        Ok((share, prefix))
    }

    fn service(profile: &ServerProfile) -> Result<String, ConnectionError> {
        if profile.host.trim().is_empty() {
            return Err(ConnectionError::InvalidAddress("empty host".into()));
        }
        let (share, _) = Self::split_root(profile)?;
        Ok(format!("//{}/{}", profile.host, share))
    }

    /// Path inside the share for a path below the remote root.
    fn in_share_path(profile: &ServerProfile, path: &str) -> Result<String, ConnectionError> {
        let (_, prefix) = Self::split_root(profile)?;
        let path = path.trim_matches('/');
        Ok(match (prefix.is_empty(), path.is_empty()) {
            (true, true) => String::new(),
            (true, false) => path.to_string(),
            (false, true) => prefix,
            (false, false) => format!("{prefix}/{path}"),
        })
    }

    async fn run(profile: &ServerProfile, command: &str) -> Result<String, SmbFailure> {
        let service = Self::service(profile)
            .map_err(|e| SmbFailure::Other(e.to_string()))?;

        let mut cmd = TokioCommand::new("smbclient");
        cmd.arg(&service);
        if profile.port != 0 {
            cmd.arg("-p").arg(profile.port.to_string());
        }
        cmd.arg("-U")
            .arg(format!("{}%{}", profile.username, profile.password.expose()));
        cmd.arg("-c").arg(command);

        let output = cmd
            .output()
            .await
            .map_err(|e| SmbFailure::Other(format!("failed to run smbclient: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Self::classify(&stderr));
        }
        // smbclient reports some NT errors on stdout with a zero exit code.
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stdout.contains("NT_STATUS_") {
            return Err(Self::classify(&stdout));
        }
        Ok(stdout)
    }

    fn classify(output: &str) -> SmbFailure {
        if output.contains("NT_STATUS_LOGON_FAILURE")
            || output.contains("NT_STATUS_ACCESS_DENIED")
        {
            SmbFailure::Auth
        } else if output.contains("NT_STATUS_OBJECT_NAME_NOT_FOUND")
            || output.contains("NT_STATUS_OBJECT_PATH_NOT_FOUND")
            || output.contains("NT_STATUS_NO_SUCH_FILE")
        {
            SmbFailure::NotFound
        } else {
            SmbFailure::Other(output.trim().to_string())
        }
    }

    fn parse_list_output(output: &str, base: &str) -> Vec<RemoteFile> {
        output
            .lines()
            .filter_map(|line| Self::parse_list_line(line, base))
            .collect()
    }

    /// Parse one row of `smbclient` ls output:
    ///
    /// ```text
    ///   filename                          D        0  Wed Dec 25 10:30:45 2024
    ///   filename                         AH     1234  Wed Dec 25 10:30:45 2024
    /// ```
    ///
    /// The name occupies a fixed-width column; attributes, size and the
    /// timestamp follow. Malformed rows are skipped.
    fn parse_list_line(line: &str, base: &str) -> Option<RemoteFile> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.contains("blocks of size") {
            return None;
        }
        if line.len() < 36 || !line.is_char_boundary(35) {
            return None;
        }

        let name = line[..35].trim();
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }

        let rest = line[35..].trim();
        let parts: Vec<&str> = rest.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        let attributes = parts[0];
        let is_dir = attributes.contains('D');
        let modified = Self::parse_timestamp(&parts);

        let path = if base.trim_end_matches('/').is_empty() {
            format!("/{name}")
        } else {
            format!("{}/{}", base.trim_end_matches('/'), name)
        };

        Some(if is_dir {
            RemoteFile::dir(name, path, modified)
        } else {
            let size = parts.get(1)?.parse::<u64>().ok()?;
            RemoteFile::file(name, path, Some(size), modified)
        })
    }

    /// The trailing fields are `Wed Dec 25 10:30:45 2024`; the size column
    /// in front of them is present for files and directories alike.
    fn parse_timestamp(parts: &[&str]) -> Option<DateTime<Local>> {
        let start = if parts.get(1).is_some_and(|p| p.parse::<u64>().is_ok()) {
            2
        } else {
            1
        };
        if parts.len() < start + 5 {
            return None;
        }
        let raw = parts[start..start + 5].join(" ");
        let naive = NaiveDateTime::parse_from_str(&raw, "%a %b %e %H:%M:%S %Y").ok()?;
        Local.from_local_datetime(&naive).single()
    }
}

impl Default for SmbBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolBackend for SmbBackend {
    async fn connect(&self, profile: &ServerProfile) -> Result<(), ConnectionError> {
        if !Self::smbclient_available() {
            return Err(ConnectionError::Unsupported(
                "smbclient not found; install the samba client package".into(),
            ));
        }
        // Validate the address before touching the network.
        Self::service(profile)?;

        match Self::run(profile, "ls").await {
            Ok(_) => Ok(()),
            Err(SmbFailure::Auth) => Err(ConnectionError::AuthFailed),
            Err(SmbFailure::NotFound) => Err(ConnectionError::Unreachable(
                "share root not found".into(),
            )),
            Err(SmbFailure::Other(msg)) => Err(ConnectionError::Unreachable(msg)),
        }
    }

    async fn list(
        &self,
        profile: &ServerProfile,
        path: &str,
    ) -> Result<Vec<RemoteFile>, ListError> {
        let in_share = Self::in_share_path(profile, path)?;
        let command = if in_share.is_empty() {
            "ls".to_string()
        } else {
            format!("cd \"{in_share}\"; ls")
        };

        let output = Self::run(profile, &command).await.map_err(|e| match e {
            SmbFailure::NotFound => ListError::NotFound(path.to_string()),
            SmbFailure::Auth => ListError::Unreachable("authentication rejected".into()),
            SmbFailure::Other(msg) => ListError::Unreachable(msg),
        })?;

        let files = Self::parse_list_output(&output, path);
        debug!("SMB listed {} entries under {path}", files.len());
        Ok(files)
    }

    async fn fetch(
        &self,
        profile: &ServerProfile,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<u64, FetchError> {
        let in_share = Self::in_share_path(profile, &file.path)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::WriteFailed(e.to_string()))?;
        }

        let command = format!("get \"{}\" \"{}\"", in_share, dest.display());
        Self::run(profile, &command).await.map_err(|e| match e {
            SmbFailure::NotFound => FetchError::NotFound(file.path.clone()),
            SmbFailure::Auth => FetchError::Unreachable("authentication rejected".into()),
            SmbFailure::Other(msg) => FetchError::Unreachable(msg),
        })?;

        let meta = tokio::fs::metadata(dest).await.map_err(|e| {
            warn!("smbclient reported success but {} is missing", dest.display());
            FetchError::WriteFailed(e.to_string())
        })?;
        Ok(meta.len())
    }
}
