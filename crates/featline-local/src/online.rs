//! File-backed online store
//!
//! Layout: `<root>/<feature-group>/<blake3(identifier)>.json`, one record per
//! file, each replaced atomically on put.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use featline_core::{AtomicFile, ErrorKind, MetadataService, OnlineStore, Record, RemoteError};

pub struct FileOnlineStore {
    root: PathBuf,
    catalog: Arc<dyn MetadataService>,
}

impl FileOnlineStore {
    /// Store under `root`; `catalog` supplies each group's identifier name.
    pub fn new(root: impl Into<PathBuf>, catalog: Arc<dyn MetadataService>) -> Self {
        Self {
            root: root.into(),
            catalog,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, feature_group: &str, identifier: &str) -> Result<PathBuf, RemoteError> {
        if feature_group.is_empty()
            || feature_group.contains(['/', '\\'])
            || feature_group.starts_with('.')
        {
            return Err(RemoteError::validation(format!(
                "invalid feature group name '{feature_group}'"
            )));
        }
        let key = blake3::hash(identifier.as_bytes()).to_hex();
        Ok(self
            .root
            .join(feature_group)
            .join(format!("{}.json", key.as_str())))
    }
}

impl OnlineStore for FileOnlineStore {
    fn get_record(
        &self,
        feature_group: &str,
        identifier: &str,
        feature_names: Option<&[String]>,
    ) -> Result<Record, RemoteError> {
        let path = self.record_path(feature_group, identifier)?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RemoteError::not_found(format!(
                    "record '{identifier}' not found in '{feature_group}'"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let mut record: Record = serde_json::from_slice(&bytes).map_err(|e| {
            RemoteError::new(
                ErrorKind::Validation,
                format!("corrupt record file {}: {e}", path.display()),
            )
        })?;
        if let Some(names) = feature_names {
            record.retain(|name, _| names.iter().any(|n| n == name));
        }
        Ok(record)
    }

    fn put_record(&self, feature_group: &str, record: &Record) -> Result<(), RemoteError> {
        let group = self.catalog.describe(feature_group)?;
        let identifier = record.identifier(&group.record_identifier).ok_or_else(|| {
            RemoteError::validation(format!(
                "record has no value for identifier '{}'",
                group.record_identifier
            ))
        })?;
        let path = self.record_path(feature_group, &identifier)?;

        let mut file = AtomicFile::create(&path)?;
        serde_json::to_writer(&mut file, record).map_err(io::Error::from)?;
        file.flush()?;
        file.commit()?;
        log::trace!("put {feature_group}/{identifier}");
        Ok(())
    }
}
