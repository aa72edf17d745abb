//! Cached market data on disk.
//!
//! ```text
//! <data_dir>/<SUBJECT>/<YYYY-MM-DD>/<kind>.txt
//! ```
//!
//! One file per data kind, prepared offline by whatever feed the desk uses.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use deliberation::{is_valid_subject, CollaboratorError, DataKind, DataRetrieval};
use tracing::debug;

pub struct CachedDataSource {
    root: PathBuf,
}

impl CachedDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(
        &self,
        subject: &str,
        date: NaiveDate,
        kind: DataKind,
    ) -> Result<PathBuf, CollaboratorError> {
        if !is_valid_subject(subject) {
            return Err(CollaboratorError::Unavailable(format!(
                "invalid subject {:?}",
                subject
            )));
        }
        Ok(self
            .root
            .join(subject.to_uppercase())
            .join(date.format("%Y-%m-%d").to_string())
            .join(format!("{}.txt", kind)))
    }
}

#[async_trait]
impl DataRetrieval for CachedDataSource {
    async fn retrieve(
        &self,
        subject: &str,
        date: NaiveDate,
        kind: DataKind,
    ) -> Result<String, CollaboratorError> {
        let path = self.path_for(subject, date, kind)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CollaboratorError::Unavailable(format!(
                    "no cached {} for {} on {}",
                    kind, subject, date
                )))
            }
            Err(e) => {
                return Err(CollaboratorError::RequestFailed(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };
        if text.trim().is_empty() {
            return Err(CollaboratorError::EmptyResponse(path.display().to_string()));
        }
        debug!(subject, kind = %kind, chars = text.len(), "cached data read");
        Ok(text)
    }
}
