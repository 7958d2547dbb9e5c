// Content repository capabilities consulted while resolving schedule requests

use crate::errors::RepositoryError;
use crate::models::{RepositoryFile, ScheduleRequest, Session, SCHEDULABLE_KEY};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Read access to the content repository
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_file(&self, path: &str) -> Result<Option<RepositoryFile>, RepositoryError>;

    async fn get_file_metadata(
        &self,
        path: &str,
    ) -> Result<HashMap<String, String>, RepositoryError>;

    /// Files under `folder` whose `metadata_key` entry equals `lineage_id`
    async fn search_generated_content(
        &self,
        folder: &str,
        lineage_id: &str,
        metadata_key: &str,
    ) -> Result<Vec<RepositoryFile>, RepositoryError>;
}

/// Lists the user-declared parameters of a transformation or job file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PdiContentProvider: Send + Sync {
    async fn get_user_parameters(&self, path: &str) -> Result<HashSet<String>, RepositoryError>;
}

/// Computes where generated output lands when the caller leaves it to us
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputPathResolver: Send + Sync {
    async fn resolve_output_file_path(
        &self,
        session: &Session,
        request: &ScheduleRequest,
    ) -> Result<String, RepositoryError>;

    /// Home folder of the caller, where generated content is stored
    async fn user_folder(&self, session: &Session) -> Result<String, RepositoryError>;
}

/// A file is schedulable unless its metadata holds exactly `"false"`
pub fn metadata_permits_scheduling(metadata: &HashMap<String, String>) -> bool {
    metadata
        .get(SCHEDULABLE_KEY)
        .map_or(true, |value| value != "false")
}

/// Output path resolver producing `{folder}/{job name}.*`
///
/// The folder is the caller's output location when given, otherwise the
/// configured default with `{user}` replaced by the caller name.
#[derive(Debug, Clone)]
pub struct DefaultOutputPathResolver {
    default_folder: String,
}

impl DefaultOutputPathResolver {
    pub fn new(default_folder: impl Into<String>) -> Self {
        Self {
            default_folder: default_folder.into(),
        }
    }
}

#[async_trait]
impl OutputPathResolver for DefaultOutputPathResolver {
    async fn resolve_output_file_path(
        &self,
        session: &Session,
        request: &ScheduleRequest,
    ) -> Result<String, RepositoryError> {
        let folder = if request.output_file.trim().is_empty() {
            self.user_folder(session).await?
        } else {
            request.output_file.trim().trim_end_matches('/').to_string()
        };
        Ok(format!("{folder}/{}.*", request.job_name))
    }

    async fn user_folder(&self, session: &Session) -> Result<String, RepositoryError> {
        Ok(self
            .default_folder
            .replace("{user}", &session.name)
            .trim_end_matches('/')
            .to_string())
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    file: RepositoryFile,
    metadata: HashMap<String, String>,
}

/// Repository held in memory, keyed by path
#[derive(Default)]
pub struct InMemoryRepository {
    files: RwLock<HashMap<String, StoredFile>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for seeding
    pub fn with_file(mut self, path: &str, metadata: HashMap<String, String>) -> Self {
        let stored = StoredFile {
            file: file_at(path),
            metadata,
        };
        self.files.get_mut().insert(path.to_string(), stored);
        self
    }

    pub async fn put_file(&self, path: &str, metadata: HashMap<String, String>) -> RepositoryFile {
        let file = file_at(path);
        self.files.write().await.insert(
            path.to_string(),
            StoredFile {
                file: file.clone(),
                metadata,
            },
        );
        file
    }
}

fn file_at(path: &str) -> RepositoryFile {
    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    RepositoryFile {
        id: Uuid::new_v4().to_string(),
        name,
        path: path.to_string(),
        folder: false,
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_file(&self, path: &str) -> Result<Option<RepositoryFile>, RepositoryError> {
        let found = self.files.read().await.get(path).map(|s| s.file.clone());
        debug!(path = %path, found = found.is_some(), "Repository lookup");
        Ok(found)
    }

    async fn get_file_metadata(
        &self,
        path: &str,
    ) -> Result<HashMap<String, String>, RepositoryError> {
        Ok(self
            .files
            .read()
            .await
            .get(path)
            .map(|s| s.metadata.clone())
            .unwrap_or_default())
    }

    async fn search_generated_content(
        &self,
        folder: &str,
        lineage_id: &str,
        metadata_key: &str,
    ) -> Result<Vec<RepositoryFile>, RepositoryError> {
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        let files = self.files.read().await;
        let mut found: Vec<RepositoryFile> = files
            .values()
            .filter(|s| s.file.path.starts_with(&prefix))
            .filter(|s| s.metadata.get(metadata_key).map(String::as_str) == Some(lineage_id))
            .map(|s| s.file.clone())
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(folder = %folder, lineage_id = %lineage_id, hits = found.len(), "Generated content search");
        Ok(found)
    }
}

/// Declared parameters per file path, fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticPdiContentProvider {
    parameters: HashMap<String, HashSet<String>>,
}

impl StaticPdiContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameters<I, S>(mut self, path: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters
            .insert(path.to_string(), names.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl PdiContentProvider for StaticPdiContentProvider {
    async fn get_user_parameters(&self, path: &str) -> Result<HashSet<String>, RepositoryError> {
        Ok(self.parameters.get(path).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_permits_scheduling() {
        assert!(metadata_permits_scheduling(&HashMap::new()));

        let mut metadata = HashMap::new();
        metadata.insert(SCHEDULABLE_KEY.to_string(), "true".to_string());
        assert!(metadata_permits_scheduling(&metadata));

        // Only the exact lowercase literal vetoes scheduling
        metadata.insert(SCHEDULABLE_KEY.to_string(), "False".to_string());
        assert!(metadata_permits_scheduling(&metadata));

        metadata.insert(SCHEDULABLE_KEY.to_string(), "false".to_string());
        assert!(!metadata_permits_scheduling(&metadata));
    }

    #[tokio::test]
    async fn test_default_output_path_uses_user_folder() {
        let resolver = DefaultOutputPathResolver::new("/home/{user}/");
        let request = ScheduleRequest {
            job_name: "sales".to_string(),
            ..ScheduleRequest::default()
        };
        let path = resolver
            .resolve_output_file_path(&Session::new("alice", &[]), &request)
            .await
            .unwrap();
        assert_eq!(path, "/home/alice/sales.*");
    }

    #[tokio::test]
    async fn test_default_output_path_prefers_requested_folder() {
        let resolver = DefaultOutputPathResolver::new("/home/{user}");
        let request = ScheduleRequest {
            job_name: "sales".to_string(),
            output_file: "/public/reports".to_string(),
            ..ScheduleRequest::default()
        };
        let path = resolver
            .resolve_output_file_path(&Session::new("alice", &[]), &request)
            .await
            .unwrap();
        assert_eq!(path, "/public/reports/sales.*");
    }

    #[tokio::test]
    async fn test_in_memory_repository_lookup() {
        let repository = InMemoryRepository::new().with_file("/public/sales.prpt", HashMap::new());

        let file = repository.get_file("/public/sales.prpt").await.unwrap().unwrap();
        assert_eq!(file.name, "sales.prpt");
        assert!(repository.get_file("/public/missing.prpt").await.unwrap().is_none());
        assert!(repository
            .get_file_metadata("/public/missing.prpt")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_search_generated_content_by_lineage() {
        let lineage = |id: &str| HashMap::from([("lineage-id".to_string(), id.to_string())]);
        let repository = InMemoryRepository::new()
            .with_file("/home/alice/sales-2.pdf", lineage("L1"))
            .with_file("/home/alice/sales-1.pdf", lineage("L1"))
            .with_file("/home/alice/other.pdf", lineage("L2"))
            .with_file("/home/alicia/sales.pdf", lineage("L1"))
            .with_file("/home/bob/sales.pdf", lineage("L1"));

        let found = repository
            .search_generated_content("/home/alice/", "L1", "lineage-id")
            .await
            .unwrap();
        let paths: Vec<&str> = found.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/home/alice/sales-1.pdf", "/home/alice/sales-2.pdf"]);
    }

    #[tokio::test]
    async fn test_user_folder_substitutes_caller() {
        let resolver = DefaultOutputPathResolver::new("/home/{user}/");
        let folder = resolver.user_folder(&Session::new("bob", &[])).await.unwrap();
        assert_eq!(folder, "/home/bob");
    }

    #[tokio::test]
    async fn test_static_pdi_provider() {
        let provider = StaticPdiContentProvider::new().with_parameters("/etl/load.ktr", ["region"]);
        let params = provider.get_user_parameters("/etl/load.ktr").await.unwrap();
        assert!(params.contains("region"));
        assert!(provider.get_user_parameters("/etl/other.ktr").await.unwrap().is_empty());
    }
}
