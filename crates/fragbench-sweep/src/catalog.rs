//! The local query set replayed at every step.

use std::path::{Path, PathBuf};

use tracing::debug;

use fragbench_core::QueryName;

use crate::error::{SweepError, SweepResult};

/// SQL scripts under `sources/queries`, one file per query.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    dir: PathBuf,
}

impl QueryCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, query: &QueryName) -> PathBuf {
        self.dir.join(query.as_str())
    }

    /// Query file names, sorted.
    pub async fn list(&self) -> SweepResult<Vec<QueryName>> {
        let catalog_err = |e: std::io::Error| SweepError::Catalog {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(catalog_err)?;
        let mut queries = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(catalog_err)? {
            if !entry.file_type().await.map_err(catalog_err)?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match QueryName::parse(&name) {
                Ok(query) => queries.push(query),
                Err(_) => debug!(%name, "skipping file with unusable query name"),
            }
        }
        queries.sort();
        Ok(queries)
    }

    /// Resolve `names` against the catalog, or list it when empty.
    pub async fn select(&self, names: &[String]) -> SweepResult<Vec<QueryName>> {
        if names.is_empty() {
            return self.list().await;
        }
        let mut queries = Vec::with_capacity(names.len());
        for name in names {
            let query = QueryName::parse(name)?;
            let path = self.path_of(&query);
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                debug!(path = %path.display(), "requested query not in catalog");
                return Err(SweepError::UnknownQuery(query.to_string()));
            }
            queries.push(query);
        }
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["q2.sql", "q10.sql", "q1.sql"] {
            std::fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        std::fs::create_dir(dir.path().join("drafts")).unwrap();

        let names: Vec<String> = QueryCatalog::new(dir.path())
            .list()
            .await
            .unwrap()
            .iter()
            .map(|q| q.to_string())
            .collect();
        assert_eq!(names, vec!["q1.sql", "q10.sql", "q2.sql"]);
    }

    #[tokio::test]
    async fn missing_directory_is_catalog_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = QueryCatalog::new(dir.path().join("queries")).list().await.unwrap_err();
        assert!(matches!(err, SweepError::Catalog { .. }));
    }

    #[tokio::test]
    async fn select_validates_explicit_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q1.sql"), "SELECT 1;").unwrap();
        let catalog = QueryCatalog::new(dir.path());
        let picked = catalog.select(&["q1.sql".to_string()]).await.unwrap();
        assert_eq!(picked[0].as_str(), "q1.sql");
        assert!(catalog.select(&["../etc/passwd".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn select_rejects_unknown_queries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q1.sql"), "SELECT 1;").unwrap();
        std::fs::create_dir(dir.path().join("drafts")).unwrap();
        let catalog = QueryCatalog::new(dir.path());

        let err = catalog.select(&["nope.sql".to_string()]).await.unwrap_err();
        assert!(matches!(err, SweepError::UnknownQuery(ref q) if q == "nope.sql"));
        assert!(catalog.select(&["drafts".to_string()]).await.is_err());
        assert!(
            catalog
                .select(&["q1.sql".to_string(), "nope.sql".to_string()])
                .await
                .is_err()
        );
    }
}
