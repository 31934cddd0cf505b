//! `ext://` resource URLs for extension frames.
//!
//! `ext://<base64url(dir)>/<file>?<query>&_r=<generation>`. The host segment
//! hides the real directory from the frame; `_r` only busts caches.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::capabilities::paths::normalize_path;
use crate::error::{RuaError, RuaResult};

pub const SCHEME: &str = "ext";
pub const CACHE_KEY: &str = "_r";

pub fn encode_dir(dir: &str) -> String {
    URL_SAFE_NO_PAD.encode(dir.as_bytes())
}

pub fn decode_dir(segment: &str) -> RuaResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| RuaError::Other(format!("Invalid resource host '{}': {}", segment, e)))?;
    String::from_utf8(bytes).map_err(|e| RuaError::Other(format!("Invalid resource host: {}", e)))
}

/// Split `entry` into its file path and query string (without `?`).
pub fn split_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once('?') {
        Some((file, query)) => (file, Some(query).filter(|q| !q.is_empty())),
        None => (entry, None),
    }
}

/// Frame source for a UI entry relative to the extension directory.
pub fn frame_source(extension_path: &Path, ui_entry: &str, generation: u64) -> String {
    let (file_path, query) = split_entry(ui_entry);
    let full = extension_path.join(file_path.trim_start_matches("./"));
    let dir = full
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let file = full
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut url = format!("{}://{}/{}?", SCHEME, encode_dir(&dir), urlencoding::encode(&file));
    if let Some(query) = query {
        url.push_str(query);
        url.push('&');
    }
    url.push_str(&format!("{}={}", CACHE_KEY, generation));
    url
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub directory: String,
    pub file: String,
    /// Query pairs with the cache key removed.
    pub query: Vec<(String, String)>,
}

/// Decode an `ext://` URL requested by a frame.
pub fn resolve_resource(raw: &str) -> RuaResult<ResourceRequest> {
    let url = url::Url::parse(raw).map_err(|e| RuaError::Other(format!("Invalid resource URL '{}': {}", raw, e)))?;
    if url.scheme() != SCHEME {
        return Err(RuaError::Other(format!("Not an extension resource: {}", raw)));
    }
    let directory = decode_dir(url.host_str().unwrap_or_default())?;
    let file = urlencoding::decode(url.path().trim_start_matches('/'))
        .map_err(|e| RuaError::Other(format!("Invalid resource path: {}", e)))?
        .into_owned();
    let query = url
        .query_pairs()
        .filter(|(k, _)| k != CACHE_KEY)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok(ResourceRequest {
        directory,
        file,
        query,
    })
}

/// Absolute file for a resource request. Refuses anything outside its directory.
pub fn resolve_asset_path(request: &ResourceRequest) -> RuaResult<PathBuf> {
    let base = normalize_path(Path::new(&request.directory));
    let target = normalize_path(&base.join(request.file.trim_start_matches('/')));
    if !target.starts_with(&base) {
        return Err(RuaError::permission_denied(
            "resource",
            Some(format!("{} escapes {}", request.file, request.directory)),
        ));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_roundtrip() {
        for dir in [
            "/home/ana/.local/share/rua/extensions/weather",
            "/Users/ana/My Extensions/dev ext",
            "/home/ana/扩展/météo",
            "C:\\Users\\ana\\ext",
        ] {
            let encoded = encode_dir(dir);
            assert!(!encoded.contains('='));
            assert!(!encoded.contains('+') && !encoded.contains('/'));
            assert_eq!(decode_dir(&encoded).unwrap(), dir);
        }
    }

    #[test]
    fn frame_source_shape() {
        let src = frame_source(Path::new("/ext/weather"), "dist/index.html?mode=compact", 3);
        let expected_host = encode_dir("/ext/weather/dist");
        assert_eq!(src, format!("ext://{}/index.html?mode=compact&_r=3", expected_host));
    }

    #[test]
    fn cache_key_without_query() {
        let src = frame_source(Path::new("/ext/a"), "index.html", 0);
        assert!(src.ends_with("/index.html?_r=0"));
    }

    #[test]
    fn resolve_strips_cache_key() {
        let src = frame_source(Path::new("/ext/My Ext"), "ui/index.html?tab=2", 7);
        let request = resolve_resource(&src).unwrap();
        assert_eq!(request.directory, "/ext/My Ext/ui");
        assert_eq!(request.file, "index.html");
        assert_eq!(request.query, vec![("tab".to_string(), "2".to_string())]);
        assert_eq!(
            resolve_asset_path(&request).unwrap(),
            PathBuf::from("/ext/My Ext/ui/index.html")
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let request = ResourceRequest {
            directory: "/ext/a".into(),
            file: "../../etc/passwd".into(),
            query: Vec::new(),
        };
        assert!(resolve_asset_path(&request).is_err());

        let nested = ResourceRequest {
            directory: "/ext/a".into(),
            file: "assets/../style.css".into(),
            query: Vec::new(),
        };
        assert_eq!(resolve_asset_path(&nested).unwrap(), PathBuf::from("/ext/a/style.css"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(resolve_resource("https://example.com/index.html").is_err());
    }
}
