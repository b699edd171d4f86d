use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Protocol family a server speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Smb,
    Nfs,
    Ftp,
    Webdav,
}

impl Protocol {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Smb => "SMB/CIFS",
            Self::Nfs => "NFS",
            Self::Ftp => "FTP",
            Self::Webdav => "WebDAV",
        }
    }

    /// URL scheme used when rendering a connection string. WebDAV rides on
    /// plain HTTP.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Smb => "smb",
            Self::Nfs => "nfs",
            Self::Ftp => "ftp",
            Self::Webdav => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Password wrapper that keeps the secret out of Debug output and is never
/// serialized back out.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Connection profile for one remote server, handed to the core by the
/// config collaborator. The core never persists these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerProfile {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    // Immutable after creation so derived connection strings cannot go
    // stale; deserialization is the only other way to set it.
    protocol: Protocol,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: Secret,
    #[serde(default = "default_root_path")]
    pub root_path: String,
}

fn default_root_path() -> String {
    "/".to_string()
}

impl ServerProfile {
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: Secret,
        root_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            protocol,
            host: host.into(),
            port,
            username: username.into(),
            password,
            root_path: root_path.into(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Connection string in the `scheme://host:port/path` form.
    pub fn url_string(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol.scheme(),
            self.host,
            self.port,
            self.root_path
        )
    }
}
