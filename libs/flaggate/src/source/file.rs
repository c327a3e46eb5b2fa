use super::{FetchOutcome, FlagSource, RegistryDocument, SourceError};
use async_trait::async_trait;
use std::path::PathBuf;

/// Registry document stored on disk.
///
/// The file is re-read on every fetch; an unchanged `version` is reported as
/// not modified.
#[derive(Debug, Clone)]
pub struct FileFlagSource {
    path: PathBuf,
}

impl FileFlagSource {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl FlagSource for FileFlagSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch_flags(&self, since: Option<&str>) -> Result<FetchOutcome, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Io(format!("{}: {e}", self.path.display())))?;
        let document = RegistryDocument::from_slice(&bytes)?;

        if since == Some(document.version.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }

        Ok(document.into_outcome())
    }
}
