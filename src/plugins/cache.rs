//! Materializes plugin binaries on disk.
//!
//! A binding's source is either a file already on this machine or a GitHub
//! release to fetch. Both end up as an executable under the cache root, and
//! repeating an unchanged `add` hands back the same path without touching
//! the network or the filesystem again.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DehydratedApiError;

/// Release assets are picked by this prefix when an archive holds more than
/// one file.
pub const PLUGIN_ASSET_PREFIX: &str = "dehydrated-api-metadata-plugin-";

/// Catalog lookups are quick; give up early.
const CATALOG_TIMEOUT: Duration = Duration::from_secs(30);
/// Downloads can be large; give them room.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Where a plugin binary comes from. The YAML shape is
/// `registry: {type: local|github, config: {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum PluginRegistrySource {
    Local(LocalSource),
    Github(GithubSource),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSource {
    /// Absolute or working-directory-relative path to the binary
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubSource {
    pub org: String,
    pub repo: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Defaults to `<os>-<arch>` of the running host
    #[serde(default)]
    pub platform: Option<String>,
}

fn default_version() -> String {
    "latest".to_string()
}

#[derive(Debug, Deserialize)]
struct Release {
    #[allow(dead_code)]
    tag_name: String,
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

pub struct PluginCache {
    root: PathBuf,
    catalog: reqwest::Client,
    download: reqwest::Client,
    /// One `add` at a time, and the resolved path per plugin name
    paths: Mutex<HashMap<String, PathBuf>>,
}

impl PluginCache {
    pub fn new(root: PathBuf) -> Result<Self, DehydratedApiError> {
        let user_agent = format!("dehydrated-api/{}", env!("CARGO_PKG_VERSION"));
        let catalog = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .timeout(CATALOG_TIMEOUT)
            .build()?;
        let download = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(PluginCache {
            root,
            catalog,
            download,
            paths: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a binding to an executable on disk, fetching it if needed.
    pub async fn add(
        &self,
        name: &str,
        source: &PluginRegistrySource,
    ) -> Result<PathBuf, DehydratedApiError> {
        let mut paths = self.paths.lock().await;
        if let Some(existing) = paths.get(name) {
            debug!("Plugin {name} already materialized at {}", existing.display());
            return Ok(existing.clone());
        }
        let path = match source {
            PluginRegistrySource::Local(local) => self.add_local(name, local).await?,
            PluginRegistrySource::Github(github) => self.add_github(name, github).await?,
        };
        paths.insert(name.to_string(), path.clone());
        Ok(path)
    }

    async fn add_local(
        &self,
        name: &str,
        source: &LocalSource,
    ) -> Result<PathBuf, DehydratedApiError> {
        let expanded = shellexpand::tilde(&source.path).to_string();
        let src = PathBuf::from(&expanded);
        let src = match src.is_absolute() {
            true => src,
            false => std::env::current_dir()?.join(src),
        };
        let meta = tokio::fs::metadata(&src).await.map_err(|err| {
            DehydratedApiError::FileError(format!("plugin source {}: {err}", src.display()))
        })?;
        if !meta.is_file() {
            return Err(DehydratedApiError::FileError(format!(
                "plugin source {} is not a regular file",
                src.display()
            )));
        }
        let basename = src.file_name().ok_or_else(|| {
            DehydratedApiError::FileError(format!("plugin source {} has no filename", src.display()))
        })?;

        let dest_dir = self.root.join(name);
        let dest = dest_dir.join(basename);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!("Reusing cached plugin binary {}", dest.display());
            return Ok(dest);
        }
        tokio::fs::create_dir_all(&dest_dir).await?;
        tokio::fs::copy(&src, &dest).await?;
        make_executable(&dest).await?;
        info!("Cached local plugin {name} at {}", dest.display());
        Ok(dest)
    }

    async fn add_github(
        &self,
        name: &str,
        source: &GithubSource,
    ) -> Result<PathBuf, DehydratedApiError> {
        let platform = source
            .platform
            .clone()
            .unwrap_or_else(|| format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH));

        let dest_dir = self
            .root
            .join("github")
            .join(&source.org)
            .join(&source.repo)
            .join(&source.version)
            .join(&platform);
        let executable = dest_dir.join(&source.repo);
        if tokio::fs::try_exists(&executable).await.unwrap_or(false) {
            debug!("Reusing cached release binary {}", executable.display());
            return Ok(executable);
        }

        let url = match source.version.as_str() {
            "latest" => format!(
                "https://api.github.com/repos/{}/{}/releases/latest",
                source.org, source.repo
            ),
            version => format!(
                "https://api.github.com/repos/{}/{}/releases/tags/{}",
                source.org, source.repo, version
            ),
        };
        debug!("Querying release catalog {url}");
        let release: Release = self
            .catalog
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()
            .map_err(|err| {
                DehydratedApiError::Release(format!(
                    "catalog query for {name} ({}/{}) failed: {err}",
                    source.org, source.repo
                ))
            })?
            .json()
            .await?;

        let asset = pick_asset(&release.assets, &platform).ok_or_else(|| {
            DehydratedApiError::Release(format!(
                "no asset matching platform {platform} for {name} ({}/{} {})",
                source.org, source.repo, source.version
            ))
        })?;

        debug!("Downloading {}", asset.browser_download_url);
        let body = self
            .download
            .get(&asset.browser_download_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| {
                DehydratedApiError::Release(format!("download of {} failed: {err}", asset.name))
            })?
            .bytes()
            .await?;

        tokio::fs::create_dir_all(&dest_dir).await?;

        if let Some(kind) = ArchiveKind::from_name(&asset.name) {
            let dest = dest_dir.clone();
            let extracted = tokio::task::spawn_blocking(move || kind.extract(&body, &dest))
                .await
                .map_err(|err| DehydratedApiError::Release(format!("extraction panicked: {err}")))?
                .map_err(|err| {
                    DehydratedApiError::Release(format!("extraction of {} failed: {err}", asset.name))
                })?;
            let chosen = choose_executable(&extracted).ok_or_else(|| {
                DehydratedApiError::Release(format!("archive {} held no regular files", asset.name))
            })?;
            if *chosen != executable {
                tokio::fs::copy(&chosen, &executable).await?;
            }
        } else {
            tokio::fs::write(&executable, &body).await?;
        }

        make_executable(&executable).await?;
        info!("Cached release plugin {name} at {}", executable.display());
        Ok(executable)
    }
}

async fn make_executable(path: &Path) -> Result<(), DehydratedApiError> {
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Case-insensitive platform match, treating `-` and `_` as the same.
fn pick_asset<'a>(assets: &'a [ReleaseAsset], platform: &str) -> Option<&'a ReleaseAsset> {
    let wanted = normalize(platform);
    assets.iter().find(|a| normalize(&a.name).contains(&wanted))
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// The asset named with the plugin prefix wins; else the first file out of
/// the archive.
fn choose_executable(extracted: &[PathBuf]) -> Option<&PathBuf> {
    extracted
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(PLUGIN_ASSET_PREFIX))
                .unwrap_or(false)
        })
        .or_else(|| extracted.first())
}

enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }

    /// Extract every regular file, flattened, into `dest`. Returns the
    /// written paths in archive order.
    fn extract(&self, body: &[u8], dest: &Path) -> std::io::Result<Vec<PathBuf>> {
        match self {
            ArchiveKind::TarGz => extract_tar_gz(body, dest),
            ArchiveKind::Zip => extract_zip(body, dest),
        }
    }
}

fn extract_tar_gz(body: &[u8], dest: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(GzDecoder::new(body));
    let mut written = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let out = dest.join(file_name);
        let mut file = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut file)?;
        written.push(out);
    }
    Ok(written)
}

fn extract_zip(body: &[u8], dest: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(body)).map_err(std::io::Error::other)?;
    let mut written = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(std::io::Error::other)?;
        if !entry.is_file() {
            continue;
        }
        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        else {
            continue;
        };
        let out = dest.join(file_name);
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        std::fs::write(&out, buf)?;
        written.push(out);
    }
    Ok(written)
}
