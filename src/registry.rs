//! The in-memory source of truth for the domains file.
//!
//! All mutations happen under one writer lock and rewrite the file in full
//! before the lock is released, so the file on disk is always a snapshot of
//! some committed in-memory state. External writers are expected; the
//! watcher calls [DomainRegistry::reload] to adopt whatever they did.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::DomainEntry;
use crate::domainsfile;
use crate::error::DehydratedApiError;
use crate::plugins::PluginRegistry;
use crate::MAX_PER_PAGE;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateDomainRequest {
    pub domain: String,
    #[serde(default)]
    pub alternative_names: Vec<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Everything but the `(domain, alias)` identity can change; the alias here
/// picks which entry to touch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateDomainRequest {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub alternative_names: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// An empty string clears the comment
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Normalized listing parameters; the web layer turns query strings into
/// this and rejects nonsense before it gets here.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// 1-based
    pub page: u32,
    pub per_page: u32,
    pub sort: Option<SortOrder>,
    pub search: Option<String>,
}

#[derive(Debug)]
pub struct ListResult {
    pub entries: Vec<DomainEntry>,
    /// Matching entries before pagination
    pub total: usize,
}

pub struct DomainRegistry {
    path: PathBuf,
    plugins: Arc<PluginRegistry>,
    entries: RwLock<Vec<DomainEntry>>,
}

impl DomainRegistry {
    /// Load the domains file, creating it empty when absent. Failure to
    /// create it means the directory is unusable, which is fatal.
    pub async fn new(
        path: PathBuf,
        plugins: Arc<PluginRegistry>,
    ) -> Result<Self, DehydratedApiError> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => domainsfile::parse(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::write(&path, b"").await.map_err(|err| {
                    DehydratedApiError::StartupError(format!(
                        "can't create domains file {}: {err}",
                        path.display()
                    ))
                })?;
                Vec::new()
            }
            Err(err) => {
                return Err(DehydratedApiError::StartupError(format!(
                    "can't read domains file {}: {err}",
                    path.display()
                )))
            }
        };
        info!("Loaded {} domain entries from {}", entries.len(), path.display());
        Ok(DomainRegistry {
            path,
            plugins,
            entries: RwLock::new(entries),
        })
    }

    pub async fn create(
        &self,
        request: CreateDomainRequest,
    ) -> Result<DomainEntry, DehydratedApiError> {
        let entry = DomainEntry {
            domain: request.domain,
            alternative_names: request.alternative_names,
            alias: request.alias,
            enabled: request.enabled,
            comment: normalize_comment(request.comment),
            metadata: Default::default(),
        };
        entry.validate()?;

        let mut entries = self.entries.write().await;
        if entries
            .iter()
            .any(|existing| existing.matches(&entry.domain, entry.alias.as_deref()))
        {
            return Err(DehydratedApiError::DuplicateDomain {
                domain: entry.domain,
                alias: entry.alias,
            });
        }
        entries.push(entry.clone());
        if let Err(err) = self.persist(&entries).await {
            entries.pop();
            return Err(err);
        }
        debug!("Created domain entry {entry}");
        Ok(entry)
    }

    /// Copy of the first entry for `domain`, or for `(domain, alias)` when
    /// an alias is given, enriched with plugin metadata.
    pub async fn get(
        &self,
        domain: &str,
        alias: Option<&str>,
    ) -> Result<DomainEntry, DehydratedApiError> {
        let found = {
            let entries = self.entries.read().await;
            match alias {
                Some(alias) => entries
                    .iter()
                    .find(|entry| entry.matches(domain, Some(alias)))
                    .cloned(),
                None => entries.iter().find(|entry| entry.domain == domain).cloned(),
            }
        };
        let mut entry = found.ok_or_else(|| DehydratedApiError::DomainNotFound {
            domain: domain.to_string(),
            alias: alias.map(str::to_string),
        })?;
        self.plugins.enrich(&mut entry).await;
        Ok(entry)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListResult, DehydratedApiError> {
        if query.page < 1 {
            return Err(DehydratedApiError::InvalidQuery(
                "page must be at least 1".to_string(),
            ));
        }
        if query.per_page < 1 || query.per_page > MAX_PER_PAGE {
            return Err(DehydratedApiError::InvalidQuery(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }

        let mut matched: Vec<DomainEntry> = {
            let entries = self.entries.read().await;
            match &query.search {
                Some(needle) => {
                    let needle = needle.to_lowercase();
                    entries
                        .iter()
                        .filter(|entry| entry.domain.to_lowercase().contains(&needle))
                        .cloned()
                        .collect()
                }
                None => entries.clone(),
            }
        };
        match query.sort {
            Some(SortOrder::Asc) => matched.sort_by(|a, b| a.domain.cmp(&b.domain)),
            Some(SortOrder::Desc) => matched.sort_by(|a, b| b.domain.cmp(&a.domain)),
            None => {}
        }

        let total = matched.len();
        let start = ((query.page - 1) as usize).saturating_mul(query.per_page as usize);
        let mut page: Vec<DomainEntry> = match start < matched.len() {
            true => matched
                .into_iter()
                .skip(start)
                .take(query.per_page as usize)
                .collect(),
            false => Vec::new(),
        };
        for entry in page.iter_mut() {
            self.plugins.enrich(entry).await;
        }
        Ok(ListResult { entries: page, total })
    }

    pub async fn update(
        &self,
        domain: &str,
        request: UpdateDomainRequest,
    ) -> Result<DomainEntry, DehydratedApiError> {
        let mut entries = self.entries.write().await;
        let index = entries
            .iter()
            .position(|entry| entry.matches(domain, request.alias.as_deref()))
            .ok_or_else(|| DehydratedApiError::DomainNotFound {
                domain: domain.to_string(),
                alias: request.alias.clone(),
            })?;

        let previous = entries[index].clone();
        let mut updated = previous.clone();
        if let Some(names) = request.alternative_names {
            updated.alternative_names = names;
        }
        if let Some(enabled) = request.enabled {
            updated.enabled = enabled;
        }
        if let Some(comment) = request.comment {
            updated.comment = normalize_comment(Some(comment));
        }
        updated.metadata.clear();
        updated.validate()?;

        entries[index] = updated.clone();
        if let Err(err) = self.persist(&entries).await {
            entries[index] = previous;
            return Err(err);
        }
        debug!("Updated domain entry {updated}");
        Ok(updated)
    }

    pub async fn delete(
        &self,
        domain: &str,
        alias: Option<&str>,
    ) -> Result<(), DehydratedApiError> {
        let mut entries = self.entries.write().await;
        let index = entries
            .iter()
            .position(|entry| entry.matches(domain, alias))
            .ok_or_else(|| DehydratedApiError::DomainNotFound {
                domain: domain.to_string(),
                alias: alias.map(str::to_string),
            })?;
        let removed = entries.remove(index);
        if let Err(err) = self.persist(&entries).await {
            entries.insert(index, removed);
            return Err(err);
        }
        debug!("Deleted domain entry for {domain}");
        Ok(())
    }

    /// Swap the cache for whatever the file holds now. The post-edit file
    /// is authoritative, even when it shrank.
    pub async fn reload(&self) -> Result<(), DehydratedApiError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            DehydratedApiError::FileError(format!(
                "can't reload domains file {}: {err}",
                self.path.display()
            ))
        })?;
        let parsed = domainsfile::parse(&content);
        let mut entries = self.entries.write().await;
        debug!(
            "Reloading domains file: {} entries -> {}",
            entries.len(),
            parsed.len()
        );
        *entries = parsed;
        Ok(())
    }

    /// Rewrite the whole file through a sibling temp file and rename, so a
    /// concurrent reader of the path never sees a torn write.
    async fn persist(&self, entries: &[DomainEntry]) -> Result<(), DehydratedApiError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| {
                DehydratedApiError::FileError(format!("{} has no parent dir", self.path.display()))
            })?
            .to_owned();
        let path = self.path.clone();
        let content = domainsfile::emit(entries);

        tokio::task::spawn_blocking(move || -> Result<(), DehydratedApiError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
            tmp.write_all(content.as_bytes())?;
            tmp.flush()?;
            tmp.persist(&path)
                .map_err(|err| DehydratedApiError::FileError(format!("rename failed: {}", err.error)))?;
            Ok(())
        })
        .await
        .map_err(|err| DehydratedApiError::FileError(format!("write task failed: {err}")))?
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment.filter(|c| !c.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::proto::DehydratedConfig;

    async fn test_registry() -> (tempfile::TempDir, Arc<DomainRegistry>) {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let plugins = Arc::new(PluginRegistry::with_sources(
            Vec::new(),
            DehydratedConfig::default(),
        ));
        let registry = DomainRegistry::new(dir.path().join("domains.txt"), plugins)
            .await
            .expect("registry build failed");
        (dir, Arc::new(registry))
    }

    fn create_request(domain: &str) -> CreateDomainRequest {
        CreateDomainRequest {
            domain: domain.to_string(),
            alternative_names: vec![],
            alias: None,
            enabled: true,
            comment: None,
        }
    }

    async fn file_content(dir: &tempfile::TempDir) -> String {
        tokio::fs::read_to_string(dir.path().join("domains.txt"))
            .await
            .expect("read failed")
    }

    #[tokio::test]
    async fn test_create_writes_through() {
        let (dir, registry) = test_registry().await;
        let created = registry
            .create(CreateDomainRequest {
                alternative_names: vec!["www.example.com".to_string()],
                ..create_request("example.com")
            })
            .await
            .expect("create failed");
        assert_eq!(created.domain, "example.com");
        assert_eq!(file_content(&dir).await, "example.com www.example.com\n");
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected_and_file_unchanged() {
        let (dir, registry) = test_registry().await;
        registry
            .create(create_request("example.com"))
            .await
            .expect("first create failed");
        let before = file_content(&dir).await;

        let err = registry
            .create(create_request("example.com"))
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(err, DehydratedApiError::DuplicateDomain { .. }));
        assert_eq!(file_content(&dir).await, before);
    }

    #[tokio::test]
    async fn test_same_domain_different_alias_allowed() {
        let (_dir, registry) = test_registry().await;
        registry
            .create(create_request("example.com"))
            .await
            .expect("create failed");
        registry
            .create(CreateDomainRequest {
                alias: Some("rsa".to_string()),
                ..create_request("example.com")
            })
            .await
            .expect("aliased create should succeed");

        let by_alias = registry
            .get("example.com", Some("rsa"))
            .await
            .expect("get failed");
        assert_eq!(by_alias.alias.as_deref(), Some("rsa"));
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let (_dir, registry) = test_registry().await;
        let err = registry
            .get("missing.example.com", None)
            .await
            .expect_err("should be absent");
        assert!(matches!(err, DehydratedApiError::DomainNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_merges_and_persists() {
        let (dir, registry) = test_registry().await;
        registry
            .create(create_request("example.com"))
            .await
            .expect("create failed");

        let updated = registry
            .update(
                "example.com",
                UpdateDomainRequest {
                    enabled: Some(false),
                    comment: Some("paused".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update failed");
        assert!(!updated.enabled);
        assert_eq!(file_content(&dir).await, "# example.com < paused\n");

        // empty comment clears it again
        let updated = registry
            .update(
                "example.com",
                UpdateDomainRequest {
                    enabled: Some(true),
                    comment: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .expect("update failed");
        assert_eq!(updated.comment, None);
        assert_eq!(file_content(&dir).await, "example.com\n");
    }

    #[tokio::test]
    async fn test_update_missing_entry() {
        let (_dir, registry) = test_registry().await;
        let err = registry
            .update("missing.example.com", UpdateDomainRequest::default())
            .await
            .expect_err("should be absent");
        assert!(matches!(err, DehydratedApiError::DomainNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one() {
        let (dir, registry) = test_registry().await;
        registry
            .create(create_request("example.com"))
            .await
            .expect("create failed");
        registry
            .create(CreateDomainRequest {
                alias: Some("rsa".to_string()),
                ..create_request("example.com")
            })
            .await
            .expect("create failed");

        registry
            .delete("example.com", None)
            .await
            .expect("delete failed");
        assert_eq!(file_content(&dir).await, "example.com > rsa\n");

        let err = registry
            .delete("example.com", None)
            .await
            .expect_err("already gone");
        assert!(matches!(err, DehydratedApiError::DomainNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reload_adopts_external_edits() {
        let (dir, registry) = test_registry().await;
        registry
            .create(create_request("example.com"))
            .await
            .expect("create failed");

        tokio::fs::write(
            dir.path().join("domains.txt"),
            "other.example.org\n# parked.example.net\n",
        )
        .await
        .expect("external write failed");
        registry.reload().await.expect("reload failed");

        let listed = registry
            .list(&ListQuery {
                page: 1,
                per_page: 100,
                sort: None,
                search: None,
            })
            .await
            .expect("list failed");
        assert_eq!(listed.total, 2);
        assert_eq!(listed.entries[0].domain, "other.example.org");
        assert!(!listed.entries[1].enabled);
    }

    #[tokio::test]
    async fn test_list_search_sort_pagination() {
        let (_dir, registry) = test_registry().await;
        for domain in ["charlie.example.com", "alpha.example.com", "bravo.example.org"] {
            registry
                .create(create_request(domain))
                .await
                .expect("create failed");
        }

        let sorted = registry
            .list(&ListQuery {
                page: 1,
                per_page: 100,
                sort: Some(SortOrder::Desc),
                search: None,
            })
            .await
            .expect("list failed");
        assert_eq!(sorted.entries[0].domain, "charlie.example.com");

        let searched = registry
            .list(&ListQuery {
                page: 1,
                per_page: 100,
                sort: None,
                search: Some("EXAMPLE.COM".to_string()),
            })
            .await
            .expect("list failed");
        assert_eq!(searched.total, 2);

        let page_two = registry
            .list(&ListQuery {
                page: 2,
                per_page: 2,
                sort: Some(SortOrder::Asc),
                search: None,
            })
            .await
            .expect("list failed");
        assert_eq!(page_two.total, 3);
        assert_eq!(page_two.entries.len(), 1);
        assert_eq!(page_two.entries[0].domain, "charlie.example.com");

        let past_end = registry
            .list(&ListQuery {
                page: 5,
                per_page: 100,
                sort: None,
                search: None,
            })
            .await
            .expect("list failed");
        assert_eq!(past_end.total, 3);
        assert!(past_end.entries.is_empty());
    }

    #[tokio::test]
    async fn test_list_rejects_bad_pagination() {
        let (_dir, registry) = test_registry().await;
        for (page, per_page) in [(0, 100), (1, 0), (1, MAX_PER_PAGE + 1)] {
            let err = registry
                .list(&ListQuery {
                    page,
                    per_page,
                    sort: None,
                    search: None,
                })
                .await
                .expect_err("should be rejected");
            assert!(matches!(err, DehydratedApiError::InvalidQuery(_)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_serialize() {
        let (dir, registry) = test_registry().await;
        let mut handles = Vec::new();
        for index in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .create(create_request(&format!("host{index}.example.com")))
                    .await
            }));
        }
        for handle in handles {
            handle
                .await
                .expect("task panicked")
                .expect("create failed");
        }
        let content = file_content(&dir).await;
        assert_eq!(content.lines().count(), 10);
        // the file must parse back to exactly the committed cache
        let listed = registry
            .list(&ListQuery {
                page: 1,
                per_page: 100,
                sort: None,
                search: None,
            })
            .await
            .expect("list failed");
        assert_eq!(crate::domainsfile::parse(&content), listed.entries);
    }
}
