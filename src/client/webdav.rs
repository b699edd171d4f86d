use super::{ProtocolBackend, RemoteFile};
use crate::error::{ConnectionError, FetchError, ListError};
use crate::profile::ServerProfile;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::debug;
use reqwest::{Client, Method, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

/// WebDAV backend over plain HTTP. Connect probes with a depth-0 PROPFIND;
/// listings are depth-1 (immediate children only, never recursive);
/// retrieval is a plain GET streamed into the destination.
pub struct WebdavBackend {
    http: Client,
}

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
  </d:prop>
</d:propfind>"#;

/// One `<d:response>` of a multistatus document, before normalization.
#[derive(Debug, Default, Clone)]
struct DavEntry {
    href: String,
    display_name: String,
    is_collection: bool,
    content_length: Option<u64>,
    last_modified: Option<String>,
}

impl WebdavBackend {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    fn propfind_method() -> Method {
        Method::from_bytes(b"PROPFIND").expect("PROPFIND is a valid method token")
    }

    /// Full URL for a path below the remote root.
    fn url_for(profile: &ServerProfile, path: &str) -> Result<Url, ConnectionError> {
        if profile.host.trim().is_empty() || profile.port == 0 {
            return Err(ConnectionError::InvalidAddress(profile.url_string()));
        }
        let base = profile.url_string();
        let full = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&full).map_err(|_| ConnectionError::InvalidAddress(full))
    }

    async fn propfind(
        &self,
        profile: &ServerProfile,
        url: Url,
        depth: &str,
    ) -> Result<reqwest::Response, ConnectionError> {
        self.http
            .request(Self::propfind_method(), url)
            .basic_auth(&profile.username, Some(profile.password.expose()))
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))
    }

    fn normalize(profile: &ServerProfile, request_path: &str, entry: &DavEntry) -> Option<RemoteFile> {
        if entry.href.is_empty() {
            return None;
        }

        let href_path = href_to_path(&entry.href);
        // A depth-1 response includes the requested resource itself; the
        // listing only wants its children.
        if href_path.trim_end_matches('/') == request_path.trim_end_matches('/') {
            return None;
        }

        let path = relative_to_root(&href_path, &profile.root_path);
        let name = if entry.display_name.is_empty() {
            last_segment(&href_path)
        } else {
            entry.display_name.clone()
        };
        if name.is_empty() {
            return None;
        }

        let modified = entry
            .last_modified
            .as_deref()
            .and_then(parse_http_date);

        Some(if entry.is_collection {
            RemoteFile::dir(name, path, modified)
        } else {
            RemoteFile::file(name, path, entry.content_length, modified)
        })
    }
}

impl Default for WebdavBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolBackend for WebdavBackend {
    async fn connect(&self, profile: &ServerProfile) -> Result<(), ConnectionError> {
        let url = Self::url_for(profile, "/")?;
        let response = self.propfind(profile, url, "0").await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectionError::AuthFailed),
            status if status.is_success() => Ok(()),
            status => Err(ConnectionError::Unreachable(format!(
                "PROPFIND returned {status}"
            ))),
        }
    }

    async fn list(
        &self,
        profile: &ServerProfile,
        path: &str,
    ) -> Result<Vec<RemoteFile>, ListError> {
        let url = Self::url_for(profile, path)?;
        let request_path = url.path().to_string();
        let response = self.propfind(profile, url, "1").await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ListError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(ListError::Unreachable(format!("PROPFIND returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ListError::Unreachable(e.to_string()))?;
        let entries = parse_multistatus(&body)
            .map_err(|e| ListError::Unreachable(format!("multistatus parse failed: {e}")))?;

        let request_path = percent_decode(&request_path);
        let files: Vec<RemoteFile> = entries
            .iter()
            .filter_map(|entry| Self::normalize(profile, &request_path, entry))
            .collect();
        debug!("WebDAV listed {} entries under {path}", files.len());
        Ok(files)
    }

    async fn fetch(
        &self,
        profile: &ServerProfile,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<u64, FetchError> {
        let url = Self::url_for(profile, &file.path)?;
        let mut response = self
            .http
            .get(url)
            .basic_auth(&profile.username, Some(profile.password.expose()))
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(file.path.clone()));
        }
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("GET returned {status}")));
        }

        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::WriteFailed(e.to_string()))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?
        {
            out.write_all(&chunk)
                .await
                .map_err(|e| FetchError::WriteFailed(e.to_string()))?;
            written += chunk.len() as u64;
        }
        out.flush()
            .await
            .map_err(|e| FetchError::WriteFailed(e.to_string()))?;

        debug!("WebDAV fetched {written} bytes from {}", file.path);
        Ok(written)
    }
}

/// Parse a multistatus document into raw entries. Responses missing an href
/// are dropped by the caller; only a document that cannot be read as XML at
/// all is an error.
fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>, quick_xml::Error> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut current_tag: Option<String> = None;
    let mut in_resourcetype = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => current = Some(DavEntry::default()),
                    "resourcetype" => in_resourcetype = true,
                    "collection" if in_resourcetype => {
                        if let Some(ref mut entry) = current {
                            entry.is_collection = true;
                        }
                    }
                    "href" | "displayname" | "getcontentlength" | "getlastmodified" => {
                        current_tag = Some(local);
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if local_name(e.name().as_ref()) == "collection" && in_resourcetype {
                    if let Some(ref mut entry) = current {
                        entry.is_collection = true;
                    }
                }
            }
            Event::Text(ref e) => {
                if let (Some(tag), Some(entry)) = (current_tag.as_deref(), current.as_mut()) {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match tag {
                        "href" => entry.href = text,
                        "displayname" => entry.display_name = text,
                        "getcontentlength" => entry.content_length = text.parse().ok(),
                        "getlastmodified" => entry.last_modified = Some(text),
                        _ => {}
                    }
                }
            }
            Event::End(ref e) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                    }
                    "resourcetype" => in_resourcetype = false,
                    _ => {
                        if current_tag.as_deref() == Some(local.as_str()) {
                            current_tag = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn local_name(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    raw.rsplit(':').next().unwrap_or(&raw).to_string()
}

/// Hrefs may be absolute URIs or absolute paths; either way the decoded path
/// portion is what listing entries are built from.
fn href_to_path(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    percent_decode(&path)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip the profile root prefix so entry paths stay rooted at the remote
/// root, matching the other backends.
fn relative_to_root(href_path: &str, root: &str) -> String {
    let root = root.trim_end_matches('/');
    let stripped = if !root.is_empty() && href_path.starts_with(root) {
        &href_path[root.len()..]
    } else {
        href_path
    };
    let stripped = stripped.trim_end_matches('/');
    if stripped.is_empty() {
        "/".to_string()
    } else if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

fn last_segment(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

fn parse_http_date(raw: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Protocol, Secret};

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
    <d:href>/song%201.mp3</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>5000000</d:getcontentlength>
        <d:getlastmodified>Wed, 25 Dec 2024 10:30:45 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    fn profile() -> ServerProfile {
        ServerProfile::new(
            "dav",
            Protocol::Webdav,
            "example.com",
            80,
            "user",
            Secret::new("pass"),
            "/",
        )
    }

    #[test]
    fn parses_collections_as_directories() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[1].is_collection);
        assert!(!entries[2].is_collection);

        let files: Vec<RemoteFile> = entries
            .iter()
            .filter_map(|e| WebdavBackend::normalize(&profile(), "/", e))
            .collect();
        assert!(files.iter().any(|f| f.is_dir));
    }

    #[test]
    fn normalization_drops_the_requested_resource_itself() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        let files: Vec<RemoteFile> = entries
            .iter()
            .filter_map(|e| WebdavBackend::normalize(&profile(), "/", e))
            .collect();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "Musik");
        assert_eq!(files[0].path, "/Musik");
    }

    #[test]
    fn file_entries_carry_size_and_decoded_names() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        let files: Vec<RemoteFile> = entries
            .iter()
            .filter_map(|e| WebdavBackend::normalize(&profile(), "/", e))
            .collect();

        let song = files.iter().find(|f| !f.is_dir).unwrap();
        assert_eq!(song.name, "song 1.mp3");
        assert_eq!(song.size, Some(5_000_000));
        assert!(song.modified.is_some());
    }

    #[test]
    fn entries_without_href_are_skipped() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:propstat><d:prop><d:displayname>ghost</d:displayname></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        let files: Vec<RemoteFile> = entries
            .iter()
            .filter_map(|e| WebdavBackend::normalize(&profile(), "/", e))
            .collect();
        assert!(files.is_empty());
    }

    #[test]
    fn garbage_body_is_an_error() {
        assert!(parse_multistatus("<d:multistatus><unclosed").is_err());
    }

    #[test]
    fn url_for_joins_base_and_path() {
        let url = WebdavBackend::url_for(&profile(), "/Musik/song1.mp3").unwrap();
        assert_eq!(url.as_str(), "http://example.com:80/Musik/song1.mp3");
    }

    #[test]
    fn url_for_rejects_port_zero() {
        let mut p = profile();
        p.port = 0;
        assert!(matches!(
            WebdavBackend::url_for(&p, "/"),
            Err(ConnectionError::InvalidAddress(_))
        ));
    }

    #[test]
    fn relative_to_root_strips_prefix() {
        assert_eq!(relative_to_root("/music/song.mp3", "/music"), "/song.mp3");
        assert_eq!(relative_to_root("/music/", "/music"), "/");
        assert_eq!(relative_to_root("/other/song.mp3", "/music"), "/other/song.mp3");
        assert_eq!(relative_to_root("/Musik/", "/"), "/Musik");
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("/song%201.mp3"), "/song 1.mp3");
        assert_eq!(percent_decode("/plain.mp3"), "/plain.mp3");
        assert_eq!(percent_decode("/bad%2"), "/bad%2");
    }

    #[test]
    fn http_dates_parse_as_rfc2822() {
        assert!(parse_http_date("Wed, 25 Dec 2024 10:30:45 GMT").is_some());
        assert!(parse_http_date("not a date").is_none());
    }
}
