use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::archive::ARCHIVE_EXTENSION;
use crate::error::{RuaError, RuaResult};

const GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    Directory(PathBuf),
    Archive(PathBuf),
    GitHub {
        owner: String,
        repo: String,
        tag: Option<String>,
    },
}

/// An install source with its package already on hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSource {
    Directory(PathBuf),
    ArchiveBytes(Vec<u8>),
}

impl InstallSource {
    /// Read or download the package. Touches no registry state.
    pub async fn fetch(self) -> RuaResult<LocalSource> {
        match self {
            InstallSource::Directory(path) => Ok(LocalSource::Directory(path)),
            InstallSource::Archive(path) => Ok(LocalSource::ArchiveBytes(tokio::fs::read(&path).await?)),
            InstallSource::GitHub { owner, repo, tag } => {
                let bytes = download_github_release(&owner, &repo, tag.as_deref()).await?;
                Ok(LocalSource::ArchiveBytes(bytes))
            }
        }
    }

    /// `github:owner/repo[@tag]`, a `.rua` file, or an extension directory.
    pub fn parse(spec: &str) -> RuaResult<Self> {
        if let Some(rest) = spec.strip_prefix("github:") {
            let (repo_part, tag) = match rest.split_once('@') {
                Some((repo, tag)) if !tag.is_empty() => (repo, Some(tag.to_string())),
                Some((repo, _)) => (repo, None),
                None => (rest, None),
            };
            let (owner, repo) = repo_part
                .split_once('/')
                .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
                .ok_or_else(|| RuaError::Other(format!("Expected github:owner/repo[@tag], got '{}'", spec)))?;
            return Ok(InstallSource::GitHub {
                owner: owner.to_string(),
                repo: repo.to_string(),
                tag,
            });
        }

        let path = PathBuf::from(spec);
        if path.is_dir() {
            Ok(InstallSource::Directory(path))
        } else if path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXTENSION) {
            if path.is_file() {
                Ok(InstallSource::Archive(path))
            } else {
                Err(RuaError::Other(format!("Package not found: {}", path.display())))
            }
        } else {
            Err(RuaError::Other(format!(
                "Not an extension directory or .{} package: {}",
                ARCHIVE_EXTENSION, spec
            )))
        }
    }
}

#[derive(Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

pub fn release_url(owner: &str, repo: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) => format!("{}/repos/{}/{}/releases/tags/{}", GITHUB_API, owner, repo, tag),
        None => format!("{}/repos/{}/{}/releases/latest", GITHUB_API, owner, repo),
    }
}

/// Download the first `.rua` asset of a GitHub release.
pub async fn download_github_release(owner: &str, repo: &str, tag: Option<&str>) -> RuaResult<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(concat!("rua-host/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let url = release_url(owner, repo, tag);
    log::info!("Fetching release metadata from {}", url);
    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(RuaError::Other(format!(
            "GitHub release lookup for {}/{} returned status {}",
            owner,
            repo,
            response.status()
        )));
    }
    let release: Release = response.json().await?;

    let suffix = format!(".{}", ARCHIVE_EXTENSION);
    let asset = release
        .assets
        .iter()
        .find(|a| a.name.ends_with(&suffix))
        .ok_or_else(|| {
            RuaError::Other(format!(
                "Release {} of {}/{} has no {} asset",
                release.tag_name, owner, repo, suffix
            ))
        })?;

    log::info!("Downloading {} from {}", asset.name, asset.browser_download_url);
    let response = client.get(&asset.browser_download_url).send().await?;
    if !response.status().is_success() {
        return Err(RuaError::Other(format!(
            "Package download returned status {}",
            response.status()
        )));
    }
    Ok(response.bytes().await?.to_vec())
}
